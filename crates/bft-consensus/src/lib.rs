//! The consensus core (spec §4.1-§4.3, §4.6, §9): `BFTEventProcessor` drives
//! the HotStuff-style chained BFT state machine; `EpochManager` detects and
//! reseeds epoch boundaries; `Dispatcher` is the single construction root and
//! event-loop entry point wiring both of those, the mempool, and `bft-sync`
//! together.

pub mod dispatcher;
pub mod epoch_manager;
pub mod evidence;
pub mod mempool;
pub mod processor;

pub use dispatcher::{Dispatcher, DispatchError, Effect, Event, SubmitError};
pub use epoch_manager::{EpochBoundary, EpochManager, EpochManagerError};
pub use evidence::{ByzantineEvidence, EvidenceLog};
pub use mempool::{Mempool, MempoolError};
pub use processor::{BFTEventProcessor, CommitResult, ProcessorError, RejectionKind, VoteOutcome};
