// neon_session: client and host engines for the Neon relay session protocol.
//
// A session host and its clients never talk directly: every datagram goes
// to a relay, which forwards it by destination id. This crate holds the two
// protocol state machines that sit at either end of the relay, plus the
// pieces they share.
//
// Module overview:
// - `client.rs`:      `Client`: connect, poll-driven packet processing,
//                     heartbeat, application sends.
// - `host.rs`:        `Host`: registration, admission, routing, liveness,
//                     blocking run loop, `HostHandle` for a spawned loop.
// - `roster.rs`:      `Roster`, the host's memberships and admission rules.
// - `heartbeat.rs`:   Ping scheduling and RTT matching.
// - `event.rs`:       `ClientEvent`/`HostEvent` and their observer traits.
// - `config.rs`:      `HostConfig`/`ClientConfig`, JSON-loadable.
// - `error.rs`:       Error enums per operation family.
// - `diagnostics.rs`: Thread-local last-error channel.
// - `transport.rs`:   `Transport` seam; UDP and in-memory implementations.
// - `clock.rs`:       `Clock` seam; system and manual clocks.
//
// Design decisions:
// - **Caller-driven client.** The client owns no threads. Its owner calls
//   `process_packets()` once per tick; timers (auto-ping, connect timeout)
//   are checked there.
// - **Host loop as a task.** `Host::start()` blocks; `Host::spawn()` runs it
//   on a dedicated thread and hands back a `HostHandle` with a stop signal,
//   an atomic client count, and the event channel.
// - **Events, not callbacks.** Both engines produce tagged events. Callers
//   drain them or install an observer; the host loop never runs caller code.
// - **Injected transport and clock.** Tests run whole sessions in one
//   process over `MemoryNetwork` with a `ManualClock`.
//
// Logging goes through `tracing`; the crate never installs a subscriber.

pub mod client;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod host;
pub mod roster;
pub mod transport;

pub use client::{Client, ConnectionState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, HostConfig};
pub use diagnostics::{clear_last_error, last_error, set_last_error};
pub use error::{AdmissionDenied, ConfigError, ConnectError, HostError, ProcessError, SendError};
pub use event::{ClientEvent, ClientObserver, HostEvent, HostObserver};
pub use heartbeat::{Heartbeat, PendingPing, round_trip_millis};
pub use host::{Host, HostHandle, HostStatus, StopSignal};
pub use roster::{MAX_NAME_LEN, Membership, Roster};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};

pub use neon_protocol as protocol;
pub use neon_protocol::{ClientId, PacketTypeEntry, PacketTypeRegistry, SessionId};
