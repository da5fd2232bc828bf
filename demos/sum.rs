use std::error::Error;

use weft::{Cpu, Device, Gpu, Iota, QueueKind, Runner, Vector, launch, sum};

async fn run<D: Device>(device: D) -> Result<(), Box<dyn Error>> {
    let cpu = Cpu::new(0)?;
    let mut runner = Runner::new(device, QueueKind::NonBlocking);
    let device = runner.device().clone();
    let queue = runner.create_queue();

    let len = 5;
    let div = device.policy().for_len(len)?;
    let mut a = Vector::<u32, _>::new(&device, len)?;
    let mut b = Vector::<u32, _>::new(&device, len)?;
    launch(queue, div, Iota, &mut a).await?;
    launch(queue, div, Iota, &mut b).await?;
    let c = sum(&a, &b, queue).await?;

    let mut host = Vector::new(&cpu, len)?;
    for (name, x) in [("a", &a), ("b", &b), ("c", &c)] {
        host.copy_from(x, queue).await?;
        queue.wait().await?;
        println!("{name}: {host}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "trace")]
    tracing_subscriber::fmt::init();

    match Gpu::resolve(0).await {
        Ok(gpu) => run(gpu).await,
        Err(err) => {
            eprintln!("{err}, running on the host");
            run(Cpu::new(0)?).await
        }
    }
}
