/// Fires once on a boolean's false→true transition
///
/// Level-high updates after the first rising edge are ignored, as is every
/// update after [`disarm`](Self::disarm).
#[derive(Debug, Default)]
pub struct RisingEdge {
    previous: bool,
    fired: bool,
    disarmed: bool,
}

impl RisingEdge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current level; returns `true` exactly once, on the first rising edge
    pub fn update(&mut self, level: bool) -> bool {
        let rising = level && !self.previous;
        self.previous = level;
        if !rising || self.fired || self.disarmed {
            return false;
        }
        self.fired = true;
        true
    }

    /// Stop firing permanently
    pub fn disarm(&mut self) {
        self.disarmed = true;
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_on_first_rising_edge() {
        let mut edge = RisingEdge::new();
        assert!(!edge.update(false));
        assert!(edge.update(true));
        assert!(!edge.update(true));
        assert!(!edge.update(false));
        assert!(!edge.update(true));
        assert!(edge.has_fired());
    }

    #[test]
    fn test_disarmed_never_fires() {
        let mut edge = RisingEdge::new();
        edge.disarm();
        assert!(!edge.update(true));
        assert!(!edge.has_fired());
    }
}
