use std::path::PathBuf;

use bucketview_lib::browser::SortKey;
use clap::{Args as ClapArgs, Parser, Subcommand};

/// Browse, preview, download and delete objects in an S3 bucket
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub connection: Connection,

    /// JSON file with worker tunables
    #[arg(long, env = "BUCKETVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: log::LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug)]
pub struct Connection {
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Endpoint of an S3-compatible service
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    #[arg(long)]
    pub path_style: bool,

    #[arg(short, long, env = "BUCKETVIEW_BUCKET")]
    pub bucket: Option<String>,

    /// Saved login to use when no keys are given
    #[arg(long, default_value = "default")]
    pub profile: String,

    /// Where saved logins live
    #[arg(long, env = "BUCKETVIEW_CREDENTIALS")]
    pub credentials_file: Option<PathBuf>,

    /// Remember the keys given on the command line under `--profile`
    #[arg(long)]
    pub save: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List buckets visible to the credentials
    Buckets,
    /// List objects under a prefix
    Ls {
        #[arg(default_value = "")]
        prefix: String,
        /// One line per object instead of the folder view
        #[arg(long)]
        flat: bool,
        /// name, size or modified
        #[arg(long, default_value = "name")]
        sort: SortKey,
        #[arg(long)]
        desc: bool,
    },
    /// Download one object
    Get { key: String, dest: PathBuf },
    /// Download objects and folders into a single .zip
    Archive {
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete objects; keys ending in `/` delete whole folders
    Rm {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Show how an object would be previewed
    Preview { key: String },
}

