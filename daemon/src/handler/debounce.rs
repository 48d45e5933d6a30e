/// Suppresses renders whose semantic value has not changed.
///
/// The first evaluation after construction (or after [`reset`](Self::reset))
/// always renders. Values are compared as the caller models them, so callers
/// should hand in what ends up on screen (rounded percentages, labels) rather
/// than raw floats.
#[derive(Debug, Clone)]
pub struct RenderDebouncer<T> {
    last: Option<T>,
    first_tick: bool,
}

impl<T: PartialEq + Clone> RenderDebouncer<T> {
    pub fn new() -> Self {
        Self {
            last: None,
            first_tick: true,
        }
    }

    /// Returns true when `value` should be rendered, recording it as the
    /// last rendered value.
    pub fn should_render(&mut self, value: &T) -> bool {
        if !self.first_tick && self.last.as_ref() == Some(value) {
            return false;
        }

        self.last = Some(value.clone());
        self.first_tick = false;
        true
    }

    /// Force the next evaluation to render regardless of the last value
    pub fn reset(&mut self) {
        self.first_tick = true;
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }
}

impl<T: PartialEq + Clone> Default for RenderDebouncer<T> {
    fn default() -> Self {
        Self::new()
    }
}
