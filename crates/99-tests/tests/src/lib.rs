//! End-to-end scenarios for the DMA engine, the benchmark card and the
//! reference link.

#[cfg(test)]
mod harness;

#[cfg(test)]
mod scenario_e2e;

#[cfg(test)]
mod round_trip;

#[cfg(test)]
mod backpressure;

#[cfg(test)]
mod fault_isolation;

#[cfg(test)]
mod block_mode;

#[cfg(test)]
mod concurrency;
