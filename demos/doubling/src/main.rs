use std::sync::Arc;
use std::time::Duration;
use bsf::{ExecutorConfig, HookError, TaskExecutor, WorkerHooks};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stand-in for a model: doubles every input. Sleeps a little per batch so
/// requests have a chance to pile up and get merged.
fn double(inputs: &[f32], outputs: &mut Vec<f32>) {
    std::thread::sleep(Duration::from_millis(5));
    outputs.extend(inputs.iter().map(|x| x * 2.0));
}

/// Pretends each worker owns a device handle.
struct DeviceHooks;

struct Device {
    id: usize,
    rounds: u64,
}

impl WorkerHooks for DeviceHooks {
    type Context = Device;

    fn init(&self, worker: usize) -> Result<Device, HookError> {
        info!(worker, "binding device");
        Ok(Device { id: worker, rounds: 0 })
    }

    fn reset(&self, device: &mut Device) -> Result<(), HookError> {
        device.rounds += 1;
        if device.rounds % 100 == 0 {
            info!(device = device.id, rounds = device.rounds, "device still serving");
        }
        Ok(())
    }
}

fn load_config() -> Result<ExecutorConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(ExecutorConfig::new()
            .threads(2)
            .max_batch_size(16)
            .batch_align(2)
            .init_timeout(Duration::from_secs(5))),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let align = config.batch_align;
    let executor = Arc::new(TaskExecutor::with_hooks(config, double, DeviceHooks)?);
    executor.start_configured()?;

    let handles = (0..100).map(|e| {
        let executor = executor.clone();
        tokio::spawn(async move {
            let len = align * (1 + e % 4);
            let input = vec![e as f32; len];
            let output = executor.submit(input)?.await?;
            info!(request = e, items = output.len(), first = output[0], "done");
            Ok::<_, bsf::BsfError>(())
        })
    }).collect::<Vec<_>>();

    for handle in futures::future::join_all(handles).await {
        match handle {
            Ok(Ok(())) => {}
            Ok(Err(e)) => println!("Request failed: {e}"),
            Err(e) => println!("Err joining handle: {:?}", e),
        }
    }

    executor.stop();
    Ok(())
}
