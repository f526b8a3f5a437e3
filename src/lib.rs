// aswarm: Autonomic defense for container-orchestrated workloads
//
// Facade over the pipeline crates:
//   sentinel  - per-node anomaly scoring, dual-path emission
//   fastpath  - authenticated UDP channel with replay defense and
//               back-pressure
//   pheromone - sliding-window quorum and elevation artifacts
//   microact  - bounded containment with TTL auto-revert and signed
//               certificates
//   control   - control-plane record abstraction shared by the daemons

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub use aswarm_control as control;
pub use aswarm_fastpath as fastpath;
pub use aswarm_microact as microact;
pub use aswarm_pheromone as pheromone;
pub use aswarm_sentinel as sentinel;
