//! CLI argument definitions

use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(name = "isolate")]
#[command(about = "Isolate a process inside a predefined environment", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Run the command with root directory set to DIR
    #[arg(short = 'R', long = "root", value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Namespaces to unshare in addition to user, pid and mount
    #[arg(short = 'U', long = "unshare", value_name = "LIST")]
    pub unshare: Vec<String>,

    /// Set uid in the entered namespace
    #[arg(short = 'u', long = "user", value_name = "UID")]
    pub uid: Option<u32>,

    /// Set gid in the entered namespace
    #[arg(short = 'g', long = "group", value_name = "GID")]
    pub gid: Option<u32>,

    /// UID mapping records (inside:outside:count[,...])
    #[arg(long = "uid-map", value_name = "MAP")]
    pub uid_map: Vec<String>,

    /// GID mapping records (inside:outside:count[,...])
    #[arg(long = "gid-map", value_name = "MAP")]
    pub gid_map: Vec<String>,

    /// Resource limits ([soft-|hard-]name=value[,...])
    #[arg(short = 'l', long = "rlimit", value_name = "LIST")]
    pub rlimit: Vec<String>,

    /// Replace the environment with the name=value lines of FILE
    #[arg(short = 'e', long = "environ", value_name = "FILE")]
    pub environ: Option<PathBuf>,

    /// Print a message for each action (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Command to run, with its arguments
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}
