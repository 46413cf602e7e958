//! Generic state-machine core shared by the Host Controller (spec.md 4.D),
//! the Machine Controller (spec.md 4.E), and the agent's Host Reconciler
//! (spec.md 4.F).
//!
//! Each of those is "a fixed set of states, one async `next()` step per
//! state, explicit edges between states" — the same shape regardless of
//! which object is being reconciled. `TransitionTo<S>` lets the edges be
//! checked by the compiler instead of only by a runtime match arm.

use async_trait::async_trait;

/// One step's outcome: either move to another state, or stop reconciling
/// (terminal success or terminal failure, distinguished by the caller's own
/// state types rather than by this enum).
pub enum Transition<S> {
    Next(S),
    Complete,
}

/// Implemented by a state `T`'s shared context to report one step.
#[async_trait]
pub trait State<Ctx>: Sync + Send + 'static {
    /// Run one step of this state against `ctx`, returning the next state
    /// to transition into (itself boxed as `dyn State<Ctx>`) or `Complete`.
    async fn next(self: Box<Self>, ctx: &mut Ctx) -> anyhow::Result<Transition<Box<dyn State<Ctx>>>>;

    /// Human-readable name used in status conditions and log spans.
    fn name(&self) -> &'static str;
}

/// Marker trait recording a legal edge `Self -> S` in the state graph.
/// `impl TransitionTo<InstallComponents> for WaitForClaim {}` is a one-line
/// assertion the compiler checks every time `next()` builds its successor,
/// so an invalid edge is a compile error rather than a surprise at runtime.
pub trait TransitionTo<S> {}

/// Drives `initial` to completion, returning the name of the terminal state
/// it stopped in. Used by binaries that don't need per-step status
/// reporting back to the API server (most do, and drive the loop
/// themselves so they can patch `status` between steps); this helper is
/// for tests and one-shot tools.
pub async fn run_to_completion<Ctx: Send>(
    mut state: Box<dyn State<Ctx>>,
    ctx: &mut Ctx,
) -> anyhow::Result<&'static str> {
    loop {
        let name = state.name();
        match state.next(ctx).await? {
            Transition::Next(next) => state = next,
            Transition::Complete => return Ok(name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct CountingCtx {
        steps: u32,
    }

    struct Start;
    struct Middle;
    struct Done;

    impl TransitionTo<Middle> for Start {}
    impl TransitionTo<Done> for Middle {}

    #[async_trait]
    impl State<CountingCtx> for Start {
        async fn next(
            self: Box<Self>,
            ctx: &mut CountingCtx,
        ) -> anyhow::Result<Transition<Box<dyn State<CountingCtx>>>> {
            ctx.steps += 1;
            Ok(Transition::Next(Box::new(Middle)))
        }
        fn name(&self) -> &'static str {
            "Start"
        }
    }

    #[async_trait]
    impl State<CountingCtx> for Middle {
        async fn next(
            self: Box<Self>,
            ctx: &mut CountingCtx,
        ) -> anyhow::Result<Transition<Box<dyn State<CountingCtx>>>> {
            ctx.steps += 1;
            Ok(Transition::Next(Box::new(Done)))
        }
        fn name(&self) -> &'static str {
            "Middle"
        }
    }

    #[async_trait]
    impl State<CountingCtx> for Done {
        async fn next(
            self: Box<Self>,
            ctx: &mut CountingCtx,
        ) -> anyhow::Result<Transition<Box<dyn State<CountingCtx>>>> {
            ctx.steps += 1;
            Ok(Transition::Complete)
        }
        fn name(&self) -> &'static str {
            "Done"
        }
    }

    #[tokio::test]
    async fn drives_through_every_state_once() {
        let mut ctx = CountingCtx { steps: 0 };
        let terminal = run_to_completion(Box::new(Start), &mut ctx).await.unwrap();
        assert_eq!(terminal, "Done");
        assert_eq!(ctx.steps, 3);
    }
}
