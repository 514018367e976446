use crate::commands::PipelineArgs;
use crate::output;

use clap::Args;
use color_eyre::Result;

use pipeline_compiler::Node;

/// Validate a pipeline YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let raw = args.pipeline.read_pipeline()?;
    let compiler = args.pipeline.compiler()?;
    let parameters = args.pipeline.parameters()?;

    output::status("Validating", &args.pipeline.pipeline.display().to_string());

    match compiler.compile_with_parameters(&raw, &parameters) {
        Ok(expanded) => {
            output::check("Templates expanded");
            output::check(&format!(
                "Structure: {} stages, {} jobs, {} steps",
                count(&expanded, "stages"),
                count(&expanded, "jobs"),
                count(&expanded, "steps")
            ));
            output::check(&format!(
                "Policy: {} rule(s) passed",
                compiler.rules().len()
            ));
        }
        Err(diagnostic) => {
            output::diagnostic(&diagnostic);
            std::process::exit(1);
        }
    }

    println!();
    output::success("Pipeline is valid");

    Ok(())
}

/// Number of items in every `key:` sequence anywhere in the tree
fn count(node: &Node, key: &str) -> usize {
    match node {
        Node::Mapping(m) => m
            .fields()
            .map(|(k, v)| {
                let own = match v {
                    Node::Sequence(items) if k == key => items.len(),
                    _ => 0,
                };
                own + count(v, key)
            })
            .sum(),
        Node::Sequence(items) => items.iter().map(|item| count(item, key)).sum(),
        Node::Scalar(_) | Node::Directive(_) => 0,
    }
}
