use glimpse_model::{BoundingBox, Placeholder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::fetch::ProcessorChain;

/// When decoded output reaches the display target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPolicy {
    /// Render once, after decoding finished.
    #[default]
    OnComplete,
    /// Also render partial animations as they become decodable.
    Progressive,
}

/// One image to load. Built up front and never changed afterwards.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: String,
    bound: Option<BoundingBox>,
    processors: ProcessorChain,
    is_animated: bool,
    cancel: CancellationToken,
    placeholder: Option<Placeholder>,
    render: RenderPolicy,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let is_animated = looks_animated(&url);
        Self {
            url,
            bound: None,
            processors: ProcessorChain::new(),
            is_animated,
            cancel: CancellationToken::new(),
            placeholder: None,
            render: RenderPolicy::default(),
        }
    }

    pub fn with_bound(mut self, bound: BoundingBox) -> Self {
        self.bound = Some(bound);
        self
    }

    pub fn with_processors(mut self, processors: ProcessorChain) -> Self {
        self.processors = processors;
        self
    }

    /// Overrides the guess made from the URL.
    pub fn animated(mut self, is_animated: bool) -> Self {
        self.is_animated = is_animated;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn with_render_policy(mut self, render: RenderPolicy) -> Self {
        self.render = render;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn bound(&self) -> Option<BoundingBox> {
        self.bound
    }

    pub fn processors(&self) -> &ProcessorChain {
        &self.processors
    }

    pub fn is_animated(&self) -> bool {
        self.is_animated
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn placeholder(&self) -> Option<&Placeholder> {
        self.placeholder.as_ref()
    }

    pub fn render_policy(&self) -> RenderPolicy {
        self.render
    }
}

/// Whether the path of `url` names a GIF.
pub fn looks_animated(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    path.to_ascii_lowercase().ends_with(".gif")
}
