use crate::commands::PipelineArgs;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

use pipeline_compiler::to_yaml;

#[derive(Args, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Write the expanded pipeline to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

pub fn execute(args: CompileArgs) -> Result<()> {
    let raw = args.pipeline.read_pipeline()?;
    let compiler = args.pipeline.compiler()?;
    let parameters = args.pipeline.parameters()?;

    output::status("Compiling", &args.pipeline.pipeline.display().to_string());
    if let Some(template) = &compiler.options().required_template {
        output::info(&format!("Required template: {}", template));
    }

    let expanded = match compiler.compile_with_parameters(&raw, &parameters) {
        Ok(node) => node,
        Err(diagnostic) => {
            output::diagnostic(&diagnostic);
            std::process::exit(1);
        }
    };

    let yaml = to_yaml(&expanded)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &yaml)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            output::success(&format!("Wrote {}", path.display()));
        }
        None => print!("{}", yaml),
    }

    Ok(())
}
