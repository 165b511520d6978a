use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = mxgrabctl::Cli::parse();
    mxgrabctl::init_tracing(cli.verbose);
    if let Err(err) = mxgrabctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
