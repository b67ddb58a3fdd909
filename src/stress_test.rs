use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vns_replicated::ReplicatedConfig;
use vns_store::{MemoryDirectory, MemoryStore};
use vns_types::{MacAddr, MacPortMap};

const TABLE_PATH: &str = "/stress/macs";

/// Parameters of one stress run
#[derive(Clone, Debug)]
pub struct StressParams {
    pub num_replicas: usize,
    pub ops_per_replica: usize,
    pub num_keys: usize,
    pub num_ports: usize,
    /// Probability that an operation is a remove instead of a put.
    pub remove_ratio: f64,
    /// Expire replica 0's session after this many of its operations.
    pub expire_after: Option<usize>,
    pub seed: u64,
    pub convergence_timeout: Duration,
    pub config: ReplicatedConfig,
}

impl Default for StressParams {
    fn default() -> Self {
        Self {
            num_replicas: 4,
            ops_per_replica: 200,
            num_keys: 64,
            num_ports: 8,
            remove_ratio: 0.2,
            expire_after: None,
            seed: 42,
            convergence_timeout: Duration::from_secs(10),
            config: ReplicatedConfig::default(),
        }
    }
}

/// Statistics collected during stress testing
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub num_replicas: usize,
    pub operations_per_replica: usize,
    pub total_puts: usize,
    pub total_removes: usize,
    pub failed_ops: usize,
    pub final_entries: usize,
    pub converged: bool,
    pub write_time: Duration,
    pub convergence_time: Duration,
    pub ops_per_second: f64,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                        ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>30} ║", self.num_replicas);
        println!("║  Operations per Replica:    {:>30} ║", self.operations_per_replica);
        println!("║  Puts / Removes:            {:>30} ║", format!("{} / {}", self.total_puts, self.total_removes));
        println!("║  Failed Operations:         {:>30} ║", self.failed_ops);
        println!("║  Final Entries:             {:>30} ║", self.final_entries);
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("║  Write Phase:               {:>29}s ║", format!("{:.3}", self.write_time.as_secs_f64()));
        println!("║  Convergence:               {:>28}ms ║", self.convergence_time.as_millis());
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

#[derive(Clone, Debug)]
enum Operation {
    Put(MacAddr, Uuid),
    Remove(MacAddr),
}

fn key_space(num_keys: usize) -> Vec<MacAddr> {
    (0..num_keys)
        .map(|i| {
            let [_, _, _, _, _, _, hi, lo] = (i as u64).to_be_bytes();
            MacAddr::new([0x02, 0x00, 0x00, 0x00, hi, lo])
        })
        .collect()
}

/// Generator that yields the operations one replica applies
fn operation_generator(
    replica: usize,
    params: &StressParams,
    keys: Arc<Vec<MacAddr>>,
    ports: Arc<Vec<Uuid>>,
) -> impl Stream<Item = Operation> {
    let seed = params.seed.wrapping_add(replica as u64);
    let ops = params.ops_per_replica;
    let remove_ratio = params.remove_ratio;
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..ops {
            let key = keys[rng.gen_range(0..keys.len())];
            if rng.gen_bool(remove_ratio) {
                yield Operation::Remove(key);
            } else {
                yield Operation::Put(key, ports[rng.gen_range(0..ports.len())]);
            }
        }
    }
}

struct Replica {
    map: MacPortMap<MemoryDirectory>,
    dir: Arc<MemoryDirectory>,
}

#[derive(Default)]
struct Counters {
    puts: AtomicUsize,
    removes: AtomicUsize,
    failed: AtomicUsize,
}

async fn run_replica(
    idx: usize,
    replica: Arc<Replica>,
    mut ops: impl Stream<Item = Operation> + Unpin,
    expire_after: Option<usize>,
    counters: Arc<Counters>,
) {
    let mut applied = 0usize;
    while let Some(op) = ops.next().await {
        let outcome = match &op {
            Operation::Put(mac, port) => replica.map.put(*mac, *port).await.map(|_| &counters.puts),
            Operation::Remove(mac) => replica.map.remove(mac).await.map(|_| &counters.removes),
        };
        match outcome {
            Ok(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(replica = idx, ?op, error = %err, "operation failed");
            }
        }

        applied += 1;
        if expire_after == Some(applied) {
            warn!(replica = idx, "expiring session");
            replica.dir.expire_session();
            tokio::time::sleep(Duration::from_millis(20)).await;
            replica.dir.reconnect();
        }
        if applied % 50 == 0 {
            tokio::task::yield_now().await;
        }
    }
}

/// Run N MAC table replicas against one store and wait for them to agree
pub async fn stress_test_mac_table(params: StressParams) -> anyhow::Result<StressTestStats> {
    info!(
        replicas = params.num_replicas,
        ops = params.ops_per_replica,
        keys = params.num_keys,
        seed = params.seed,
        "starting MAC table stress test"
    );

    let store = MemoryStore::new();
    let mut replicas = Vec::with_capacity(params.num_replicas);
    for _ in 0..params.num_replicas {
        let dir = Arc::new(store.connect());
        let map = MacPortMap::with_config(dir.clone(), TABLE_PATH, params.config.clone());
        map.start().await?;
        replicas.push(Arc::new(Replica { map, dir }));
    }

    let keys = Arc::new(key_space(params.num_keys.max(1)));
    let ports: Arc<Vec<Uuid>> = Arc::new((0..params.num_ports.max(1)).map(|_| Uuid::new_v4()).collect());
    let counters = Arc::new(Counters::default());

    info!("[Phase 1/2] applying operations");
    let start = Instant::now();
    let mut handles = Vec::with_capacity(replicas.len());
    for (idx, replica) in replicas.iter().enumerate() {
        let ops = Box::pin(operation_generator(idx, &params, keys.clone(), ports.clone()));
        let expire_after = if idx == 0 { params.expire_after } else { None };
        handles.push(tokio::spawn(run_replica(
            idx,
            replica.clone(),
            ops,
            expire_after,
            counters.clone(),
        )));
    }
    for handle in handles {
        handle.await?;
    }
    let write_time = start.elapsed();

    info!("[Phase 2/2] waiting for convergence");
    let reader = store.connect();
    let converge_start = Instant::now();
    let mut converged = false;
    let mut expected: HashMap<MacAddr, Uuid> = HashMap::new();
    while converge_start.elapsed() < params.convergence_timeout {
        expected = MacPortMap::get_as_map(&reader, TABLE_PATH).await?;
        if replicas.iter().all(|r| r.map.snapshot() == expected) {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let convergence_time = converge_start.elapsed();

    if !converged {
        for (idx, replica) in replicas.iter().enumerate() {
            warn!(
                replica = idx,
                entries = replica.map.len(),
                expected = expected.len(),
                stale = replica.map.is_stale(),
                "replica diverged"
            );
        }
    }

    for replica in &replicas {
        replica.map.stop().await;
    }

    let total_puts = counters.puts.load(Ordering::Relaxed);
    let total_removes = counters.removes.load(Ordering::Relaxed);
    let total_ops = total_puts + total_removes;
    let stats = StressTestStats {
        num_replicas: params.num_replicas,
        operations_per_replica: params.ops_per_replica,
        total_puts,
        total_removes,
        failed_ops: counters.failed.load(Ordering::Relaxed),
        final_entries: expected.len(),
        converged,
        write_time,
        convergence_time,
        ops_per_second: total_ops as f64 / write_time.as_secs_f64().max(f64::EPSILON),
    };
    info!(
        converged,
        entries = stats.final_entries,
        failed = stats.failed_ops,
        convergence_ms = convergence_time.as_millis() as u64,
        "stress test finished"
    );
    Ok(stats)
}

/// Repeat the stress test with a growing number of replicas
pub async fn stress_test_scaling(
    max_replicas: usize,
    step_size: usize,
    base: StressParams,
) -> anyhow::Result<Vec<StressTestStats>> {
    let step_size = step_size.max(1);
    let mut results = Vec::new();
    let mut current_replicas = step_size;
    while current_replicas <= max_replicas {
        let params = StressParams {
            num_replicas: current_replicas,
            ..base.clone()
        };
        let stats = stress_test_mac_table(params).await?;
        stats.print();
        results.push(stats);
        current_replicas += step_size;
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_run_converges() {
        let params = StressParams {
            num_replicas: 3,
            ops_per_replica: 40,
            num_keys: 8,
            expire_after: Some(20),
            ..StressParams::default()
        };
        let stats = stress_test_mac_table(params).await.unwrap();
        assert!(stats.converged);
        assert_eq!(stats.total_puts + stats.total_removes + stats.failed_ops, 120);
    }

    #[tokio::test]
    async fn test_generator_is_deterministic() {
        let params = StressParams {
            ops_per_replica: 25,
            ..StressParams::default()
        };
        let keys = Arc::new(key_space(4));
        let ports = Arc::new(vec![Uuid::nil()]);
        let first: Vec<_> = operation_generator(1, &params, keys.clone(), ports.clone())
            .collect()
            .await;
        let second: Vec<_> = operation_generator(1, &params, keys, ports).collect().await;
        assert_eq!(first.len(), 25);
        assert_eq!(format!("{:?}", first), format!("{:?}", second));
    }

    #[test]
    fn test_key_space_is_distinct() {
        let keys = key_space(300);
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), 300);
    }
}
