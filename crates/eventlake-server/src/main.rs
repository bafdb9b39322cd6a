//! eventlake node entry point.
//!
//! Boot order: configuration → local store → gossip cluster → tables →
//! background tasks (sweep, DNS, metrics, membership) → ingestion →
//! exchange server. Shutdown runs the same list backwards: the queue
//! reader stops first so no new work enters, the in-flight append
//! drains, query calls get a grace window, the store closes, gossip is
//! left best-effort.
//!
//! Configuration comes from the TOML file named by `TALARIA_CONF`; see
//! `config.rs` for the recognised options. Logging is controlled by
//! `RUST_LOG`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use tonic::transport::Server;
use tracing::{info, warn};

use eventlake_cluster::{Cluster, DnsReconciler, InProcessHub, ZoneFileProvider, GOSSIP_PORT};
use eventlake_ingest::{
    Appender, FetchConfig, Fetcher, Ingestor, MemoryQueue, NotificationQueue, QueueConfig,
    QueueReader, SpoolQueue, StoreFactory,
};
use eventlake_proto::exchange::exchange_server::ExchangeServer;
use eventlake_server::shutdown::{wait_for_signal, GRACE_PERIOD};
use eventlake_server::{metrics, Config, ExchangeService, ServerError, Shutdown};
use eventlake_store::{DiskStore, NodesTable, Store, Sweeper, TimeSeries, TimeSeriesConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::load()?;
    info!(env = %cfg.env, port = cfg.port, "starting eventlake node");
    metrics::register();

    // Local block store; failing to open it is unrecoverable.
    let store = Arc::new(DiskStore::open(&cfg.data_dir)?);

    // Gossip membership. The in-process hub is the transport seam a
    // memberlist-style library plugs into.
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let uid = uuid::Uuid::new_v4().simple().to_string();
    let node_id = format!("{host}-{}", &uid[..8]);
    let address = format!("{host}:{}", cfg.port);
    let hub = InProcessHub::new();
    let mut attributes = std::collections::HashMap::new();
    attributes.insert("env".to_string(), cfg.env.clone());
    let cluster = Cluster::with_attributes(hub.transport(), node_id, address, attributes);
    info!(gossip_port = GOSSIP_PORT, node_id = %cluster.node_id(), "joining cluster");
    cluster.join(&[]).await?;

    // Tables and the exchange service.
    let eventlog = TimeSeries::new(
        TimeSeriesConfig {
            name: cfg.presto.table.clone(),
            key_column: cfg.storage.key_column.clone(),
            time_column: cfg.storage.time_column.clone(),
            ttl: cfg.ttl(),
        },
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&cluster),
    );
    let nodes = NodesTable::new(Arc::clone(&cluster));
    let service = ExchangeService::new(Arc::clone(&eventlog), nodes);

    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        Arc::clone(&cluster).run(shutdown.subscribe()),
    ));
    tasks.push(tokio::spawn(
        Sweeper::new(Arc::clone(&store) as Arc<dyn Store>, cfg.ttl()).run(shutdown.subscribe()),
    ));

    if let Some(route) = &cfg.route {
        info!(domain = %route.domain, zone = %route.zone_id, "starting DNS reconciliation");
        let reconciler = DnsReconciler::new(
            Arc::clone(&cluster),
            ZoneFileProvider::new(),
            route.domain.clone(),
            route.zone_id.clone(),
        );
        tasks.push(tokio::spawn(reconciler.run(shutdown.subscribe())));
    }

    if let Some(statsd) = &cfg.statsd {
        let (host, port) = (statsd.host.clone(), statsd.port);
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = metrics::serve(host, port, rx).await {
                warn!(error = %e, "metrics endpoint failed");
            }
        }));
    }

    // Store-size gauge, refreshed in the background.
    {
        let store = Arc::clone(&store);
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        metrics::STORE_SIZE_BYTES.set(store.size() as i64);
                    }
                }
            }
        }));
    }

    // Ingestion: queue → fetch → append through the service.
    let queue = open_queue(&cfg)?;
    let reader = QueueReader::new(
        queue,
        QueueConfig {
            queue_url: cfg.sqs.endpoint.clone(),
            region: cfg.aws_region.clone(),
            wait_timeout: cfg.wait_timeout(),
            visibility_timeout: cfg.visibility_timeout(),
        },
    );
    let region = cfg.aws_region.clone();
    let factory: Arc<StoreFactory> = Arc::new(move |bucket: &str| {
        let s3 = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket)
            .build()?;
        Ok(Arc::new(s3) as Arc<dyn ObjectStore>)
    });
    let fetcher = Fetcher::new(factory, FetchConfig::default());
    let ingestor = Arc::new(Ingestor::new(
        reader,
        fetcher,
        Arc::new(service.clone()) as Arc<dyn Appender>,
    ));
    info!(queue = %cfg.sqs.endpoint, "starting ingestion");
    let ingest_handle = tokio::spawn({
        let ingestor = Arc::clone(&ingestor);
        let rx = shutdown.subscribe();
        async move { ingestor.run(rx).await }
    });

    // Signals drive the shutdown sequence.
    let shutdown = Arc::new(shutdown);
    tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    // Serve until shutdown; in-flight calls get the grace window.
    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port)
        .parse()
        .map_err(|e| ServerError::ConfigInvalid(format!("bad listen address: {e}")))?;
    info!(%addr, table = %cfg.presto.table, "exchange server listening");

    let mut serve_rx = shutdown.subscribe();
    let server = Server::builder()
        .add_service(ExchangeServer::new(service))
        .serve_with_shutdown(addr, async move {
            let _ = serve_rx.wait_for(|stop| *stop).await;
        });
    tokio::pin!(server);

    let mut grace_rx = shutdown.subscribe();
    let grace = async move {
        let _ = grace_rx.wait_for(|stop| *stop).await;
        tokio::time::sleep(GRACE_PERIOD).await;
    };

    tokio::select! {
        result = &mut server => result.map_err(|e| ServerError::Transport(e.to_string()))?,
        _ = grace => warn!("grace period elapsed, aborting in-flight calls"),
    }

    // Drain ingestion (it finishes its in-flight message), then the
    // background tasks, then leave the cluster.
    let _ = tokio::time::timeout(GRACE_PERIOD, ingest_handle).await;
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }
    cluster.leave().await;

    info!("shutdown complete");
    Ok(())
}

/// Open the configured notification queue. An SQS-compatible client
/// implements `NotificationQueue` behind the same seam; the binary
/// ships the spool and in-memory backends.
fn open_queue(cfg: &Config) -> anyhow::Result<Arc<dyn NotificationQueue>> {
    let endpoint = &cfg.sqs.endpoint;
    if let Some(path) = endpoint.strip_prefix("spool://") {
        let queue = SpoolQueue::open(path, cfg.visibility_timeout())
            .map_err(|e| ServerError::ConfigInvalid(e.to_string()))?;
        return Ok(queue as Arc<dyn NotificationQueue>);
    }
    if endpoint.starts_with("memory://") {
        return Ok(MemoryQueue::new(cfg.visibility_timeout()) as Arc<dyn NotificationQueue>);
    }
    Err(ServerError::ConfigInvalid(format!(
        "unsupported queue scheme in sqs.endpoint: {endpoint}"
    ))
    .into())
}
