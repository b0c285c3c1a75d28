use clap::Parser;
use edge_training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_logging("edge_training=info");
    let args = TrainArgs::parse();
    let loss = run_train(args)?;
    tracing::info!("final training loss {loss:.4}");
    Ok(())
}
