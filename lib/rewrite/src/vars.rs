use oxrdf::Variable;

/// Produces fresh variable names, unique within one planning run.
#[derive(Debug, Default)]
pub struct VariableGenerator {
    counter: usize,
}

impl VariableGenerator {
    pub fn new() -> VariableGenerator {
        VariableGenerator { counter: 0 }
    }

    pub fn fresh(&mut self, base: &str) -> Variable {
        let variable = Variable::new_unchecked(format!("{base}_{}", self.counter));
        self.counter += 1;
        variable
    }
}
