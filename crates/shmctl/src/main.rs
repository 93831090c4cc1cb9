use anyhow::{Context, bail};
use shmem::unlink_channel;

/// Removes the OS resources a channel leaves behind in /dev/shm and the
/// named-semaphore namespace. Run between sessions when a process died
/// without cleaning up after itself.
fn main() -> anyhow::Result<()> {
    let channels: Vec<String> = std::env::args().skip(1).collect();
    if channels.is_empty() {
        bail!("usage: shmctl <channel> [<channel>...]");
    }

    for channel in &channels {
        unlink_channel(channel).with_context(|| format!("Failed to unlink '{channel}'"))?;
        println!("unlinked channel '{channel}'");
    }

    Ok(())
}
