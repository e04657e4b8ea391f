use std::sync::Arc;

/// Mutable argument list threaded through a calculator chain.
///
/// The list is append-only: calculators may add entries but there is no API
/// for removing what an earlier calculator contributed, so later calculators
/// can rely on everything added before them being present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgList {
    entries: Vec<String>,
}

impl ArgList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, arg: impl Into<String>) {
        self.entries.push(arg.into());
    }

    pub fn extend<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.entries.extend(args.into_iter().map(Into::into));
    }

    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<String> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<String>> for ArgList {
    fn from(entries: Vec<String>) -> Self {
        Self { entries }
    }
}

/// One step of an argument calculation. Implementations append or derive
/// entries; they never remove existing ones.
pub trait ArgsCalculator {
    fn calculate(&self, args: &mut ArgList);
}

impl<T: ArgsCalculator + ?Sized> ArgsCalculator for Box<T> {
    fn calculate(&self, args: &mut ArgList) {
        (**self).calculate(args);
    }
}

impl<T: ArgsCalculator + ?Sized> ArgsCalculator for Arc<T> {
    fn calculate(&self, args: &mut ArgList) {
        (**self).calculate(args);
    }
}

/// Ordered sequence of calculators.
///
/// `plus` appends a step; steps run in the order they were added, on the same
/// list, so a later step sees everything an earlier one contributed. An empty
/// chain is a no-op.
#[derive(Default)]
pub struct CalculatorChain {
    steps: Vec<Box<dyn ArgsCalculator>>,
}

impl CalculatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plus(mut self, step: impl ArgsCalculator + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }
}

impl ArgsCalculator for CalculatorChain {
    fn calculate(&self, args: &mut ArgList) {
        for step in &self.steps {
            step.calculate(args);
        }
    }
}
