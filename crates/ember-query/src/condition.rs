//! Predicated rendering: gate subsequent draws on a query's result without
//! any CPU readback.
//!
//! The condition unit compares words in the query's result record on the
//! GPU. The comparison mode follows from the query kind, its occlusion
//! nesting depth, whether the caller is willing to let the GPU wait for the
//! result, and negation.

use crate::cmd::{Access, CmdSink, CondMode, Method};
use crate::context::{DeviceContext, RenderCondition};
use crate::error::QueryError;
use crate::query::{emit_sequence_wait, Query, QueryKind};

/// Caller-requested render-condition behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CondRenderMode {
    /// The GPU waits for the query result before deciding.
    Wait,
    /// Draws may proceed speculatively while the result is pending.
    NoWait,
    /// Like `Wait`, but the decision may vary per screen region.
    ByRegionWait,
    /// Like `NoWait`, per screen region.
    ByRegionNoWait,
}

impl CondRenderMode {
    fn waits(self) -> bool {
        matches!(self, CondRenderMode::Wait | CondRenderMode::ByRegionWait)
    }
}

impl DeviceContext {
    /// Program the render condition.
    ///
    /// With no query, rendering is unconditional. Only occlusion and
    /// stream-output-overflow predicates are legal sources; anything else
    /// fails with [`QueryError::InvalidPredicateQuery`] and leaves the
    /// previously programmed condition untouched.
    pub fn set_render_condition(
        &mut self,
        sink: &mut dyn CmdSink,
        query: Option<&Query>,
        mode: CondRenderMode,
        negated: bool,
    ) -> Result<(), QueryError> {
        let Some(q) = query else {
            self.cond = RenderCondition {
                query_id: None,
                mode: Some(CondMode::Always),
            };
            sink.reserve(2);
            sink.emit_header(Method::COND_MODE, 1);
            sink.emit_word(CondMode::Always as u32);
            return Ok(());
        };

        let (cond, wait) = match q.kind() {
            // Comparing the two halves of the record only works once both
            // have landed, so the GPU always waits here.
            QueryKind::TransformFeedbackOverflowPredicate { .. } => {
                let cond = if negated { CondMode::Equal } else { CondMode::NotEqual };
                (cond, true)
            }
            QueryKind::OcclusionCounter | QueryKind::OcclusionPredicate => {
                let wait = mode.waits();
                let cond = if !negated {
                    if q.nesting() > 0 {
                        // Nested windows chain to the enclosing counter; the
                        // nonzero shortcut is only sound at the outermost
                        // level.
                        if wait {
                            CondMode::NotEqual
                        } else {
                            CondMode::Always
                        }
                    } else {
                        CondMode::ResNonZero
                    }
                } else if wait {
                    CondMode::Equal
                } else {
                    CondMode::Always
                };
                (cond, wait)
            }
            _ => return Err(QueryError::InvalidPredicateQuery),
        };

        self.cond = RenderCondition {
            query_id: Some(q.id()),
            mode: Some(cond),
        };

        if wait {
            emit_sequence_wait(sink, q);
        }

        let Some(region) = q.region() else {
            return Ok(());
        };
        sink.reserve(4);
        sink.reference_buffer(region.buffer(), Access::READ | Access::STAGING);
        sink.emit_header(Method::COND_ADDRESS, 3);
        sink.emit_address(region.device_address() + u64::from(q.window_base()));
        sink.emit_word(cond as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SystemMemory;
    use crate::cmd::NullSink;
    use crate::context::DeviceCaps;

    #[test]
    fn no_query_means_always_render() {
        let mut ctx = DeviceContext::new(DeviceCaps::default());
        let mut sink = NullSink::default();
        ctx.set_render_condition(&mut sink, None, CondRenderMode::NoWait, false)
            .unwrap();
        assert_eq!(ctx.render_condition().query_id, None);
        assert_eq!(ctx.render_condition().mode, Some(CondMode::Always));
    }

    #[test]
    fn non_predicate_query_is_rejected_and_state_kept() {
        let mut ctx = DeviceContext::new(DeviceCaps::default());
        let mut mem = SystemMemory::new();
        let mut sink = NullSink::default();

        let occ = {
            let mut q = ctx
                .create_query(&mut mem, QueryKind::OcclusionPredicate)
                .unwrap();
            ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
            ctx.end_query(&mut mem, &mut sink, &mut q);
            q
        };
        ctx.set_render_condition(&mut sink, Some(&occ), CondRenderMode::NoWait, false)
            .unwrap();
        let before = ctx.render_condition();
        assert_eq!(before.mode, Some(CondMode::ResNonZero));

        let bad = ctx.create_query(&mut mem, QueryKind::TimeElapsed).unwrap();
        assert_eq!(
            ctx.set_render_condition(&mut sink, Some(&bad), CondRenderMode::Wait, false)
                .unwrap_err(),
            QueryError::InvalidPredicateQuery
        );
        assert_eq!(ctx.render_condition(), before);

        ctx.destroy_query(&mut mem, &mut sink, occ);
        ctx.destroy_query(&mut mem, &mut sink, bad);
    }

    #[test]
    fn negated_occlusion_selects_equal_when_waiting() {
        let mut ctx = DeviceContext::new(DeviceCaps::default());
        let mut mem = SystemMemory::new();
        let mut sink = NullSink::default();

        let mut q = ctx
            .create_query(&mut mem, QueryKind::OcclusionCounter)
            .unwrap();
        ctx.begin_query(&mut mem, &mut sink, &mut q).unwrap();
        ctx.end_query(&mut mem, &mut sink, &mut q);

        ctx.set_render_condition(&mut sink, Some(&q), CondRenderMode::Wait, true)
            .unwrap();
        assert_eq!(ctx.render_condition().mode, Some(CondMode::Equal));

        ctx.set_render_condition(&mut sink, Some(&q), CondRenderMode::NoWait, true)
            .unwrap();
        assert_eq!(ctx.render_condition().mode, Some(CondMode::Always));

        ctx.destroy_query(&mut mem, &mut sink, q);
    }
}
