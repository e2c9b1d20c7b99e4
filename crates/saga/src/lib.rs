//! Saga executor for multi-step operations.
//!
//! A [`FlowChain`] runs an ordered list of [`Step`]s over a mutable context
//! owned by the caller. Each step may carry a rollback action. If a step
//! fails, the rollbacks of the steps that already completed run in reverse
//! order and the chain ends with the failing step's error.
//!
//! ```ignore
//! let report = FlowChain::new("add-vm-nic")
//!     .then(Step::new("persist-ref", |ctx: &mut Ctx| Box::pin(ctx.persist_ref()))
//!         .with_rollback(|ctx: &mut Ctx| Box::pin(ctx.delete_ref())))
//!     .then(Step::new("backend-add", |ctx: &mut Ctx| Box::pin(ctx.backend_add())))
//!     .run(&mut ctx)
//!     .await?;
//! ```

pub mod error;
pub mod flow;
pub mod state;

pub use error::FlowFailure;
pub use flow::{FlowChain, FlowReport, Step};
pub use state::SagaState;
