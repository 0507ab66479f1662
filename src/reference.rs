use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{ErrorKind, HostError};

/// Host callback that returns the source of a referenced prompt.
pub type ReferenceResolver =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<String, HostError>> + Send + Sync>;

pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 16;

pub(crate) fn resolver<F, Fut>(f: F) -> ReferenceResolver
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, HostError>> + Send + 'static,
{
    Arc::new(move |prompt| f(prompt).boxed())
}

/// Prompts being resolved, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReferenceChain {
    prompts: Vec<String>,
}

impl ReferenceChain {
    /// Chain for resolving `prompt` one level below this one.
    pub fn enter(&self, prompt: &str, max_depth: usize) -> Result<Self, ErrorKind> {
        if self.prompts.iter().any(|seen| seen == prompt) {
            return Err(ErrorKind::ReferenceCycle(prompt.to_string()));
        }
        if self.prompts.len() >= max_depth {
            return Err(ErrorKind::ReferenceDepthExceeded(max_depth));
        }
        let mut prompts = self.prompts.clone();
        prompts.push(prompt.to_string());
        Ok(Self { prompts })
    }

    pub fn depth(&self) -> usize {
        self.prompts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cycles() {
        let chain = ReferenceChain::default()
            .enter("a", 16)
            .and_then(|chain| chain.enter("b", 16))
            .unwrap();
        assert_eq!(chain.depth(), 2);
        assert_eq!(chain.enter("a", 16), Err(ErrorKind::ReferenceCycle("a".into())));
    }

    #[test]
    fn limits_depth() {
        let chain = ReferenceChain::default().enter("a", 1).unwrap();
        assert_eq!(chain.enter("b", 1), Err(ErrorKind::ReferenceDepthExceeded(1)));
    }
}
