//! Local playground: a registry, two priced providers and one composite on
//! the in-process transport.
//!
//! ```text
//! RUST_LOG=debug cargo run --bin tessera-playground -- --iterations 3
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tessera_core::{time, Operation, Value, ValueKind};
use tessera_server::logging::{init_tracing, LogFormat};
use tessera_server::service::config::{CompositeConfig, WorkerPoolConfig, WorkerPoolMode};
use tessera_server::service::{OperationError, Reply};
use tessera_server::{
    AtomicService, CompositeService, CostProbe, FailureLogProbe, MemoryBus, MinCostPolicy,
    RegistryService, SequentialEngine, ServiceGroup, ServiceRegistry,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tessera-playground", about = "Run a small composite workflow in-process")]
struct Args {
    /// Number of composite invocations.
    #[arg(long, default_value_t = 5, env = "TESSERA_ITERATIONS")]
    iterations: u32,

    /// Milliseconds per logical time unit.
    #[arg(long, default_value_t = time::DEFAULT_SCALE_MS, env = "TESSERA_TIME_SCALE")]
    scale: u64,

    /// QoS requirement to invoke the composite with.
    #[arg(long, default_value = "cheapest")]
    qos: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

/// Sums observed costs.
#[derive(Default)]
struct CostLedger {
    micros: AtomicU64,
}

impl CostProbe for CostLedger {
    fn service_cost(&self, service_name: &str, op_name: &str, cost: f64) {
        info!(service = service_name, op = op_name, cost, "cost observed");
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        self.micros
            .fetch_add((cost * 1_000_000.0).round() as u64, Ordering::Relaxed);
    }
}

fn pricer(bus: &Arc<MemoryBus>, name: &str, cost: f64, markup: f64) -> AtomicService {
    AtomicService::builder("Pricer", format!("pricer.{name}"))
        .name(name)
        .response_time(2)
        .operation(
            Operation::new("quote", vec![ValueKind::String], Some(ValueKind::Float))
                .with_cost(cost),
            move |mut args| async move {
                let item: String = args.next()?;
                #[allow(clippy::cast_precision_loss)]
                let base = item.len() as f64;
                Ok::<_, OperationError>(Reply::value(base * markup))
            },
        )
        .build(bus.transport())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;
    time::set_scale(args.scale);

    let bus = MemoryBus::new();
    let registry = ServiceRegistry::new();
    let group = ServiceGroup::new();

    group.add(Arc::new(RegistryService::build(registry.clone(), bus.transport())));
    group.add(Arc::new(pricer(&bus, "premium", 5.0, 1.5)));
    group.add(Arc::new(pricer(&bus, "budget", 2.0, 1.1)));

    let shop = CompositeService::builder("Shop", "shop")
        .name("shop")
        .workflow("Pricer.quote")
        .config(CompositeConfig {
            worker_pool: WorkerPoolConfig {
                mode: WorkerPoolMode::Fixed(0),
                max_queue_size: 0,
            },
            max_retry_attempts: 2,
            ..CompositeConfig::default()
        })
        .build(Arc::new(SequentialEngine), bus.transport());
    shop.add_qos_requirement("cheapest", Arc::new(MinCostPolicy));
    shop.probes().subscribe_workflow(Arc::new(FailureLogProbe));
    let ledger = Arc::new(CostLedger::default());
    shop.probes().subscribe_cost(ledger.clone());
    group.add(Arc::new(shop.clone()));

    group.start_all().await.context("starting services")?;
    group.register_all().await;
    info!(services = ?registry.all_service_names(), "registry populated");

    for i in 0..args.iterations {
        let item = format!("item-{i}");
        let result = shop
            .invoke_composite_service(&args.qos, vec![Value::from(item.as_str())])
            .await;
        info!(iteration = i, item = %item, ?result, "invocation finished");
    }

    #[allow(clippy::cast_precision_loss)]
    let total = ledger.micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
    info!(
        total_cost = total,
        cached = shop.contains_services("Pricer", "quote"),
        "done"
    );

    group.stop_all().await.context("stopping services")?;
    Ok(())
}
