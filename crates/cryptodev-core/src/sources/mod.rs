//! Platform entropy probe implementations.

pub mod compression;
pub mod cpu;
pub mod disk;
pub mod external;
pub mod kernel;
pub mod system;
pub mod timing;

use crate::source::EntropySource;

/// Sources run by every fast poll. Cheap, synchronous, signal-safe.
pub fn fast_sources() -> Vec<Box<dyn EntropySource>> {
    vec![
        Box::new(timing::TimerJitterSource),
        Box::new(timing::ClockSource),
        Box::new(system::ProcessStatSource),
    ]
}

/// Sources run by the background gatherer during a slow poll, in rough order
/// of expected value per unit time.
pub fn slow_sources() -> Vec<Box<dyn EntropySource>> {
    vec![
        Box::new(kernel::KernelRngSource),
        Box::new(kernel::HwRngDeviceSource),
        Box::new(cpu::CpuRngSource),
        Box::new(system::ProcfsSource),
        Box::new(system::SysinfoSource),
        Box::new(compression::CompressionTimingSource),
        Box::new(disk::DiskJitterSource),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Speed;

    #[test]
    fn catalogue_speed_classes_are_consistent() {
        for source in fast_sources() {
            assert_eq!(source.info().speed, Speed::Fast, "{}", source.name());
            assert!(source.info().weight <= 10, "{}", source.name());
        }
        for source in slow_sources() {
            assert_eq!(source.info().speed, Speed::Slow, "{}", source.name());
        }
    }

    #[test]
    fn only_the_hardware_rng_may_reach_full_quality_alone() {
        for source in fast_sources().iter().chain(slow_sources().iter()) {
            if source.name() != "hwrng_device" {
                assert!(source.info().weight < 100, "{}", source.name());
            }
        }
    }
}
