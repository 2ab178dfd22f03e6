use anyhow::Result;
use clap::Parser;
use krishi_sakhi::cli::CliArgs;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    krishi_sakhi::run(args).await
}
