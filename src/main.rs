use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use csv2coco::{convert, exit_code, Args};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.to_convert_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid arguments: {}", e);
            return ExitCode::from(2);
        }
    };

    info!(
        "Converting {} -> {} (splits: {})",
        config.root.display(),
        config.out.display(),
        config.splits.join(", ")
    );

    let result = convert(&config);
    match &result {
        Ok(report) => {
            if report.orphan_csv_files > 0 {
                info!("{} CSV file(s) had no matching image", report.orphan_csv_files);
            }
            for (category, split) in &report.aborted {
                error!("No output for {} {}", category, split);
            }
        }
        Err(e) => error!("Conversion failed: {}", e),
    }
    ExitCode::from(exit_code(&result))
}
