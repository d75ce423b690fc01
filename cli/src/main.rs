use clap::{ArgAction, Parser};
use mkgfs2_core::{FormatSession, LockName, ModeFlags, RequestArgs};
use mkgfs2_filesystems::Gfs2Structures;
use mkgfs2_platform::FileDevice;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const PROG_NAME: &str = "gfs2_mkfs";

#[derive(Parser, Debug)]
#[command(name = PROG_NAME)]
#[command(about = "Make a GFS2 filesystem", long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Filesystem block size
    #[arg(short = 'b', value_name = "bytes")]
    block_size: Option<u32>,

    /// Size of quota change file
    #[arg(short = 'c', value_name = "MB")]
    qcsize: Option<u32>,

    /// Enable debugging code
    #[arg(short = 'D')]
    debug: bool,

    /// Size of journals
    #[arg(short = 'J', value_name = "MB")]
    journal_size: Option<u32>,

    /// Number of journals
    #[arg(short = 'j', value_name = "num")]
    journals: Option<u32>,

    /// Don't ask for confirmation
    #[arg(short = 'O')]
    override_confirmation: bool,

    /// Name of the locking protocol
    #[arg(short = 'p', value_name = "name")]
    lockproto: Option<String>,

    /// Don't print anything
    #[arg(short = 'q')]
    quiet: bool,

    /// Resource Group Size
    #[arg(short = 'r', value_name = "MB")]
    rgsize: Option<u32>,

    /// Name of the lock table
    #[arg(short = 't', value_name = "name")]
    locktable: Option<String>,

    /// Size of unlinked file
    #[arg(short = 'u', value_name = "MB")]
    utsize: Option<u32>,

    /// Print program version information, then exit
    #[arg(short = 'V', action = ArgAction::SetTrue)]
    version: bool,

    /// Expert mode: relaxes the resource group and locking checks
    #[arg(short = 'X')]
    expert: bool,

    /// Device to format
    #[arg(value_name = "device")]
    devices: Vec<PathBuf>,
}

impl Cli {
    fn into_request_args(self) -> anyhow::Result<RequestArgs> {
        let defaults = RequestArgs::default();
        Ok(RequestArgs {
            block_size: self.block_size.unwrap_or(defaults.block_size),
            journal_size_mb: self.journal_size.unwrap_or(defaults.journal_size_mb),
            journals: self.journals.unwrap_or(defaults.journals),
            rgsize_mb: self.rgsize.unwrap_or(defaults.rgsize_mb),
            utsize_mb: self.utsize.unwrap_or(defaults.utsize_mb),
            qcsize_mb: self.qcsize.unwrap_or(defaults.qcsize_mb),
            lockproto: match self.lockproto {
                Some(name) => LockName::protocol(name)?,
                None => defaults.lockproto,
            },
            locktable: match self.locktable {
                Some(name) => LockName::table(name)?,
                None => defaults.locktable,
            },
            devices: self.devices,
            flags: ModeFlags {
                debug: self.debug,
                quiet: self.quiet,
                override_confirmation: self.override_confirmation,
                expert: self.expert,
            },
        })
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber installed by an embedding process keeps precedence.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn print_version(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{} {}", PROG_NAME, env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "Copyright (C) {}", env!("CARGO_PKG_AUTHORS"))?;
    writeln!(out, "License: {}", env!("CARGO_PKG_LICENSE"))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut output = stdout.lock();
    if cli.version {
        print_version(&mut output)?;
        return Ok(());
    }

    init_logging(cli.debug);
    let args = cli.into_request_args()?;
    tracing::debug!(?args, "parsed command line");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut backend = Gfs2Structures::new();
    FormatSession::new(args).run(FileDevice::open, &mut backend, &mut input, &mut output)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", PROG_NAME, e);
            ExitCode::FAILURE
        }
    }
}
