//! `a3s-airgap version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("a3s-airgap version {}", a3s_airgap_core::VERSION);
    Ok(())
}
