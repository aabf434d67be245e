//! Loop-continuation strategies for the scheduler.

/// Consulted before every tick
pub trait Controller: Send {
    fn should_continue(&mut self) -> bool;
}

/// Run until the process is stopped
#[derive(Debug, Clone, Copy, Default)]
pub struct Forever;

impl Controller for Forever {
    fn should_continue(&mut self) -> bool {
        true
    }
}

/// Run exactly `n` ticks
#[derive(Debug, Clone, Copy)]
pub struct Iterations {
    remaining: usize,
}

impl Iterations {
    pub fn new(n: usize) -> Self {
        Self { remaining: n }
    }
}

impl Controller for Iterations {
    fn should_continue(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterations() {
        let mut controller = Iterations::new(3);
        let ticks = std::iter::from_fn(|| controller.should_continue().then_some(())).count();
        assert_eq!(ticks, 3);
        assert!(!controller.should_continue());
    }

    #[test]
    fn test_zero_iterations() {
        assert!(!Iterations::new(0).should_continue());
    }

    #[test]
    fn test_forever() {
        let mut controller = Forever;
        assert!((0..1000).all(|_| controller.should_continue()));
    }
}
