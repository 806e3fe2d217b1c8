use log::debug;

use crate::{context::RunContext, error::InstallerError, ui};

/// One stage of the install.
///
/// The runner calls `precondition`, `run`, `postcondition` in that order and
/// stops at the first error.
pub trait Step {
    fn name(&self) -> &str;

    fn precondition(&self, _ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        Ok(())
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError>;

    fn postcondition(&self, _ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        Ok(())
    }
}

/// An ordered list of steps, run strictly in sequence.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: impl Step + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step. The returned error names the step that failed;
    /// nothing after it is attempted.
    pub fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let total = self.steps.len();
        debug!("pipeline: {}", self.names().join(" → "));

        for (i, step) in self.steps.iter().enumerate() {
            ui::print_step(i + 1, total, step.name());
            run_step(step.as_ref(), ctx).map_err(|e| InstallerError::Step {
                step: step.name().to_string(),
                source: Box::new(e),
            })?;
            debug!("step '{}' done", step.name());
        }

        Ok(())
    }
}

fn run_step(step: &dyn Step, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
    step.precondition(ctx)?;
    step.run(ctx)?;
    step.postcondition(ctx)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::fake::{test_config, FakePlatform};

    struct Probe {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
        fail_pre: bool,
        fail_post: bool,
    }

    impl Probe {
        fn new(name: &'static str, log: &Rc<RefCell<Vec<String>>>) -> Self {
            Probe {
                name,
                log: Rc::clone(log),
                fail_pre: false,
                fail_post: false,
            }
        }
    }

    impl Step for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn precondition(&self, _ctx: &RunContext<'_>) -> Result<(), InstallerError> {
            self.log.borrow_mut().push(format!("{}:pre", self.name));
            if self.fail_pre {
                return Err(InstallerError::NoDisk);
            }
            Ok(())
        }

        fn run(&self, _ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
            self.log.borrow_mut().push(format!("{}:run", self.name));
            Ok(())
        }

        fn postcondition(&self, _ctx: &RunContext<'_>) -> Result<(), InstallerError> {
            self.log.borrow_mut().push(format!("{}:post", self.name));
            if self.fail_post {
                return Err(InstallerError::PoolMissing("bpool".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn runs_steps_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.push(Probe::new("a", &log));
        pipeline.push(Probe::new("b", &log));

        let fake = FakePlatform::new();
        let mut ctx = RunContext::new(&fake, test_config(), "/mnt");
        pipeline.run(&mut ctx).unwrap();

        assert_eq!(pipeline.names(), vec!["a", "b"]);
        assert_eq!(
            *log.borrow(),
            vec!["a:pre", "a:run", "a:post", "b:pre", "b:run", "b:post"]
        );
    }

    #[test]
    fn failed_precondition_skips_the_action_and_the_rest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        let mut bad = Probe::new("guarded", &log);
        bad.fail_pre = true;
        pipeline.push(bad);
        pipeline.push(Probe::new("later", &log));

        let fake = FakePlatform::new();
        let mut ctx = RunContext::new(&fake, test_config(), "/mnt");
        let err = pipeline.run(&mut ctx).unwrap_err();

        assert!(matches!(err, InstallerError::Step { ref step, .. } if step == "guarded"));
        assert_eq!(*log.borrow(), vec!["guarded:pre"]);
    }

    #[test]
    fn failed_postcondition_is_reported_against_its_step() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.push(Probe::new("first", &log));
        let mut bad = Probe::new("pools", &log);
        bad.fail_post = true;
        pipeline.push(bad);

        let fake = FakePlatform::new();
        let mut ctx = RunContext::new(&fake, test_config(), "/mnt");
        let err = pipeline.run(&mut ctx).unwrap_err();

        assert_eq!(err.exit_code(), 5);
        assert!(err.to_string().starts_with("Step 'pools' failed"));
    }
}
