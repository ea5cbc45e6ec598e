//! Devices command

use anyhow::Result;
use blink_compute::{DeviceSet, describe_devices};

pub fn run() -> Result<()> {
    let set = DeviceSet::detect();
    print!("{}", describe_devices(&set));
    println!(
        "GPU: {}",
        set.gpu_name().unwrap_or(blink_node::NO_GPU_NAME)
    );
    Ok(())
}
