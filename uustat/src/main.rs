use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "uustat",
    version,
    about = "Show, kill and rejuvenate jobs queued in a UUCP spool directory",
    long_about = "`uustat` lists the command files waiting in a UUCP spool directory and lets you
cancel (kill) or rejuvenate queued jobs by their job id.

EXAMPLE:
    # List every queued job
    uustat -a

    # Kill two jobs queued for system foo
    uustat -k foo.N0a1Z -k foo.N0a20

Without -a, -s, -k or -r all queued jobs are listed."
)]
struct Args {
    // Job selection
    /// List jobs queued for every system
    #[arg(short = 'a', long = "all", help_heading = "Job selection")]
    all: bool,

    /// List jobs queued for SYSTEM
    #[arg(
        short = 's',
        long = "system",
        value_name = "SYSTEM",
        conflicts_with = "all",
        help_heading = "Job selection"
    )]
    system: Option<String>,

    /// Kill a job (can be specified multiple times)
    #[arg(short = 'k', long = "kill", value_name = "JOBID", action = clap::ArgAction::Append, help_heading = "Job selection")]
    kill: Vec<String>,

    /// Rejuvenate a job so it is not removed for age (can be specified multiple times)
    #[arg(short = 'r', long = "rejuvenate", value_name = "JOBID", action = clap::ArgAction::Append, help_heading = "Job selection")]
    rejuvenate: Vec<String>,

    // Spool settings
    /// Root of the spool tree
    #[arg(
        long,
        default_value = "/var/spool/uucp",
        value_name = "PATH",
        help_heading = "Spool settings"
    )]
    spool_dir: std::path::PathBuf,

    /// Directory holding system and port locks
    #[arg(
        long,
        default_value = "/var/spool/uucp",
        value_name = "PATH",
        help_heading = "Spool settings"
    )]
    lock_dir: std::path::PathBuf,

    /// Name of the local system (default: host name up to the first dot)
    #[arg(long, value_name = "NAME", help_heading = "Spool settings")]
    local_name: Option<String>,

    /// Spool directory layout
    #[arg(long, value_enum, default_value_t = common::SpoolLayout::Taylor, help_heading = "Spool settings")]
    layout: common::SpoolLayout,

    // Progress & output
    /// Print job listings as JSON
    #[arg(long, help_heading = "Progress & output")]
    json: bool,

    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

/// One queued job as printed by the listing
#[derive(Debug, serde::Serialize)]
struct JobListing {
    #[serde(flatten)]
    job: common::scan::QueuedJob,
    modified: String,
    requests: Vec<common::job::Request>,
}

fn local_name(args: &Args) -> Result<String> {
    if let Some(name) = &args.local_name {
        return Ok(name.clone());
    }
    let host = nix::unistd::gethostname()
        .context("failed to read host name")?
        .into_string()
        .map_err(|name| anyhow!("host name {:?} is not valid UTF-8", name))?;
    Ok(host.split('.').next().unwrap_or_default().to_string())
}

fn modified_time(metadata: &std::fs::Metadata) -> String {
    metadata
        .modified()
        .map(|time| {
            chrono::DateTime::<chrono::Local>::from(time)
                .format("%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|_| "-".to_string())
}

async fn list_jobs(ctx: &common::Context, system: Option<&str>) -> Result<Vec<JobListing>> {
    let mut scanner = common::scan::CommandScanner::new(ctx, system);
    let mut listings = vec![];
    while let Some(job) = scanner.next().await? {
        // a job may finish between the scan and the read
        let (requests, metadata) = match tokio::try_join!(
            common::job::read_requests(&job.path),
            async {
                tokio::fs::metadata(&job.path)
                    .await
                    .map_err(|err| common::Error::io("stat", &job.path, err))
            }
        ) {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!("skipping {}: {}", job.job_id, error);
                continue;
            }
        };
        listings.push(JobListing {
            modified: modified_time(&metadata),
            job,
            requests,
        });
    }
    listings.sort_by(|a, b| a.job.job_id.cmp(&b.job.job_id));
    Ok(listings)
}

fn print_listings(listings: &[JobListing]) {
    for listing in listings {
        let job = &listing.job;
        if listing.requests.is_empty() {
            println!("{} {} - {} (no requests)", job.job_id, job.system, listing.modified);
        }
        for request in &listing.requests {
            println!(
                "{} {} {} {} {}",
                job.job_id,
                job.system,
                request.user,
                listing.modified,
                request.describe()
            );
        }
    }
}

#[instrument(skip(cancel))]
async fn async_main(args: Args, cancel: tokio_util::sync::CancellationToken) -> Result<()> {
    let config = common::SpoolConfig::new(
        &args.spool_dir,
        &args.lock_dir,
        local_name(&args)?,
        args.layout,
    );
    config
        .validate()
        .map_err(|error| anyhow!("invalid configuration: {}", error))?;
    let ctx = common::Context::new(config).with_cancellation(cancel);
    let mut success = true;
    for job_id in &args.kill {
        match common::job::kill_job(&ctx, job_id).await {
            Ok(_) => println!("Job {job_id} killed"),
            Err(error) => {
                tracing::error!("{}: {}", job_id, error);
                success = false;
            }
        }
    }
    for job_id in &args.rejuvenate {
        match common::job::rejuvenate_job(&ctx, job_id).await {
            Ok(_) => println!("Job {job_id} rejuvenated"),
            Err(error) => {
                tracing::error!("{}: {}", job_id, error);
                success = false;
            }
        }
    }
    let acted = !args.kill.is_empty() || !args.rejuvenate.is_empty();
    if args.all || args.system.is_some() || !acted {
        let listings = list_jobs(&ctx, args.system.as_deref()).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&listings)?);
        } else {
            print_listings(&listings);
        }
    }
    if !success {
        return Err(anyhow!("uustat encountered errors"));
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let func = {
        let args = args.clone();
        |cancel| async_main(args, cancel)
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
