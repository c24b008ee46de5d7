//! Routes each operation to one of two link lists.

use std::fmt;
use std::sync::Arc;
use wirelink_core::{
    bind_links, BoundLinks, ClientError, Link, NextLink, Operation, OperationLink,
    OperationObservable, Runtime,
};

type Condition = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Operations matching `condition` go to `on_true`, the rest to `on_false`.
///
/// Both lists must end with a terminating link.
pub fn split_link(
    condition: impl Fn(&Operation) -> bool + Send + Sync + 'static,
    on_true: Vec<Arc<dyn Link>>,
    on_false: Vec<Arc<dyn Link>>,
) -> SplitLink {
    SplitLink {
        condition: Arc::new(condition),
        on_true,
        on_false,
    }
}

#[derive(Clone)]
pub struct SplitLink {
    condition: Condition,
    on_true: Vec<Arc<dyn Link>>,
    on_false: Vec<Arc<dyn Link>>,
}

impl fmt::Debug for SplitLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitLink")
            .field("on_true", &self.on_true.len())
            .field("on_false", &self.on_false.len())
            .finish()
    }
}

impl Link for SplitLink {
    fn bind(&self, runtime: &Runtime) -> Result<Arc<dyn OperationLink>, ClientError> {
        if self.on_true.is_empty() || self.on_false.is_empty() {
            return Err(ClientError::config("split_link needs links on both branches"));
        }
        Ok(Arc::new(BoundSplitLink {
            condition: Arc::clone(&self.condition),
            on_true: bind_links(&self.on_true, runtime)?,
            on_false: bind_links(&self.on_false, runtime)?,
        }))
    }
}

struct BoundSplitLink {
    condition: Condition,
    on_true: BoundLinks,
    on_false: BoundLinks,
}

impl OperationLink for BoundSplitLink {
    // The outer continuation is dropped: each branch is a complete chain.
    fn call(&self, op: Operation, _next: NextLink) -> OperationObservable {
        let branch = if (self.condition)(&op) {
            &self.on_true
        } else {
            &self.on_false
        };
        NextLink::new(Arc::clone(branch)).call(op)
    }
}
