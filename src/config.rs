use std::net::SocketAddr;
use std::path::PathBuf;

pub const AAGUID: [u8; 16] = [
    0x4b, 0x69, 0xb9, 0xd6, 0xef, 0x0d, 0x97, 0x69, 0xc4, 0x42, 0x10, 0xa0, 0x07, 0x02, 0x27, 0x7a,
];
/// Largest request accepted from a transport (CTAPHID maximum message size).
pub const MAX_MESSAGE_SIZE: usize = 7609;
pub const CONFIRM_TIMEOUT_SECS: u64 = 30;

#[derive(clap::Parser, Debug, Clone)]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[arg(long, default_value = "127.0.0.1:11107")]
    pub listen: SocketAddr,
    /// Override the XDG data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long, default_value = "pinentry")]
    pub pinentry: String,
    /// Seconds to wait for a confirmation before the command fails.
    #[arg(long, default_value_t = CONFIRM_TIMEOUT_SECS)]
    pub confirm_timeout_secs: u64,
    /// Delete all stored credentials and keys, then exit.
    #[arg(long)]
    pub wipe: bool,
}
