use clap::{Parser, Subcommand};
use o2m_sync::{
    run_check, run_full, run_incremental, run_reverse, AppOpts, CdcOpts, FullOpts, MetaStore,
    MysqlClient, OracleClient, ReverseOpts, SourceOpts, TargetOpts,
};

#[derive(Parser)]
#[command(name = "o2m-sync")]
#[command(about = "Migrate an Oracle schema to MySQL/TiDB: reverse DDL, structure check, snapshot full load and LogMiner-based incremental replication")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate the Oracle schema into MySQL/TiDB DDL scripts
    Reverse {
        #[command(flatten)]
        app: AppOpts,
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        target: TargetOpts,
        #[command(flatten)]
        reverse: ReverseOpts,
    },
    /// Compare source and target table structures and emit remediation DDL
    Check {
        #[command(flatten)]
        app: AppOpts,
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        target: TargetOpts,
    },
    /// Snapshot-consistent full data copy
    Full {
        #[command(flatten)]
        app: AppOpts,
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        target: TargetOpts,
        #[command(flatten)]
        full: FullOpts,
    },
    /// Resume incremental replication from the stored SCN watermarks
    Incr {
        #[command(flatten)]
        app: AppOpts,
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        target: TargetOpts,
        #[command(flatten)]
        cdc: CdcOpts,
    },
    /// Full load, then incremental replication
    AllO2m {
        #[command(flatten)]
        app: AppOpts,
        #[command(flatten)]
        source: SourceOpts,
        #[command(flatten)]
        target: TargetOpts,
        #[command(flatten)]
        full: FullOpts,
        #[command(flatten)]
        cdc: CdcOpts,
    },
}

/// Shared driver handles; the metadata store always rides its own pool.
struct Handles {
    oracle: OracleClient,
    mysql: MysqlClient,
    meta: MetaStore,
}

async fn connect(app: &AppOpts, source: &SourceOpts, target: &TargetOpts) -> anyhow::Result<Handles> {
    // A couple of spare connections cover catalog queries running next to
    // the workload.
    let oracle = OracleClient::connect(source, (app.threads + 2) as u32)?;
    let mysql = MysqlClient::connect(target)?;
    let meta = MetaStore::connect(target).await?;
    Ok(Handles { oracle, mysql, meta })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reverse {
            app,
            source,
            target,
            reverse,
        } => {
            let h = connect(&app, &source, &target).await?;
            run_reverse(&app, &source, &target, &reverse, &h.oracle, &h.mysql, &h.meta).await?;
        }
        Commands::Check { app, source, target } => {
            let h = connect(&app, &source, &target).await?;
            run_check(&app, &source, &target, &h.oracle, &h.mysql, &h.meta).await?;
        }
        Commands::Full {
            app,
            source,
            target,
            full,
        } => {
            let h = connect(&app, &source, &target).await?;
            run_full(&app, &source, &target, &full, &h.oracle, &h.mysql, &h.meta).await?;
        }
        Commands::Incr {
            app,
            source,
            target,
            cdc,
        } => {
            let h = connect(&app, &source, &target).await?;
            run_incremental(&source, &target, &cdc, &h.oracle, &h.mysql, &h.meta).await?;
        }
        Commands::AllO2m {
            app,
            source,
            target,
            full,
            cdc,
        } => {
            let h = connect(&app, &source, &target).await?;
            run_full(&app, &source, &target, &full, &h.oracle, &h.mysql, &h.meta).await?;
            run_incremental(&source, &target, &cdc, &h.oracle, &h.mysql, &h.meta).await?;
        }
    }

    Ok(())
}
