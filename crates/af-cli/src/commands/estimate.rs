use af_core::types::Complexity;
use af_intelligence::cost_model::{estimate_feature_cost, CostEstimate, EstimateInput, TestingScope};

/// Run the `estimate` subcommand.
pub fn run(complexity: Complexity, needs_database: bool, testing_scope: TestingScope) {
    let estimate = estimate_feature_cost(&EstimateInput {
        complexity,
        needs_database,
        testing_scope,
    });
    println!("{}", render(&estimate));
}

fn render(estimate: &CostEstimate) -> String {
    let mut out = String::new();
    for line in &estimate.lines {
        out.push_str(&format!(
            "{:<18} {:<7} {:>7} in {:>7} out  ${:.4}\n",
            line.role.as_str(),
            line.tier.as_str(),
            line.tokens.input,
            line.tokens.output,
            line.cost
        ));
    }
    out.push_str(&format!("{:<18} ${:.4}", "total", estimate.total));
    out
}
