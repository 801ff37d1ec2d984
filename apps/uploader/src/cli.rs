use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Upload maps to a FastDL server.
#[derive(Parser, Debug)]
#[command(name = "fastdl-upload", version, about)]
pub struct Args {
    /// Map files to upload, all in parallel.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Upload page URL (overrides the config file).
    #[arg(long)]
    pub url: Option<Url>,

    /// Anti-forgery token; scraped from the upload page when omitted.
    #[arg(long)]
    pub csrf_token: Option<String>,

    /// Session cookie sent with every request, e.g. `session=...`.
    #[arg(long)]
    pub cookie: Option<String>,

    /// Seconds a tracking card stays open after the last progress update.
    #[arg(long, value_name = "SECS")]
    pub linger: Option<u64>,

    /// Do not follow server-side processing.
    #[arg(long)]
    pub no_tracking: bool,

    /// Alternative config file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
