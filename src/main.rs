use clap::Parser;
use logwrap::cli::CliArgs;
use logwrap::{config, logging, run_command};

#[tokio::main]
async fn main() {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help and version go to stdout and are not failures.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    match run_main(args).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("logwrap error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run_main(args: CliArgs) -> anyhow::Result<i32> {
    logging::init_logging(args.log_level)?;

    let path = args.config.clone().or_else(config::find_config_file);
    let config = config::load(path.as_deref(), &args.overrides())?;

    let outcome = run_command(&config, args.command).await?;
    if let logwrap::ExitOutcome::Failed(err) = &outcome {
        eprintln!("logwrap error: {err}");
    }
    Ok(outcome.exit_code())
}
