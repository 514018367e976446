use crate::commands::parse_params;

use clap::Args;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use pipeline_compiler::expression::{extract_segments, substitute, Segment};
use pipeline_compiler::{evaluate, to_yaml, ExpressionContext, Node, UpstreamStatus, Value};

/// Evaluate a compile-time expression
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Expression, bare (`eq(parameters.env, 'prod')`) or as text with `${{ }}`
    pub expression: String,

    /// Parameter, value parsed as YAML (repeatable)
    #[arg(short, long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Compile-time variable, value parsed as YAML (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Treat upstream work as failed when evaluating status functions
    #[arg(long)]
    pub failed: bool,
}

pub fn execute(args: EvalArgs) -> Result<()> {
    let mut context = ExpressionContext::new().with_parameters(parse_params(&args.params)?);
    for (name, value) in parse_params(&args.vars)? {
        context = context.with_variable(name, value);
    }
    if args.failed {
        context = context.with_status(UpstreamStatus::Failed);
    }

    let value = eval(&args.expression, &context)?;
    match value {
        Value::Array(_) | Value::Object(_) => print!("{}", to_yaml(&Node::from(value))?),
        scalar => println!("{}", scalar.as_string()),
    }
    Ok(())
}

fn eval(expression: &str, context: &ExpressionContext) -> Result<Value> {
    let segments = extract_segments(expression);
    let result = match segments.as_slice() {
        [Segment::CompileTime(expr)] => evaluate(expr, context),
        _ if segments.iter().any(Segment::is_compile_time) => {
            substitute(expression, context).map(Value::String)
        }
        _ => evaluate(expression, context),
    };
    result.map_err(|e| eyre!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_forms() {
        let context = ExpressionContext::new().with_parameter("env", "prod");
        assert_eq!(
            eval("eq(parameters.env, 'PROD')", &context).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval("${{ parameters.env }}", &context).unwrap(),
            Value::String("prod".to_string())
        );
        assert_eq!(
            eval("deploy-${{ parameters.env }}-$(Build.BuildId)", &context).unwrap(),
            Value::String("deploy-prod-$(Build.BuildId)".to_string())
        );
        assert!(eval("parameters.missing", &context).is_err());
    }
}
