// Consumer: fixed-rate tick loop on the far side of the relay.
// Drains the egress endpoint without blocking, applies fresh commands to the
// actuation sink and advances it one tick at a time.

pub mod receiver;
pub mod sink;
pub mod pacer;
pub mod tick_loop;
