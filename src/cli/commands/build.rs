//! Build command

use crate::build::{BuildRequest, CloudBuilder, LocalBuilder};
use crate::cli::args::{BuildArgs, BuildMode};
use crate::config::{Config, Layout};
use crate::error::StrataResult;
use console::style;

pub async fn build(args: BuildArgs, config: &Config) -> StrataResult<()> {
    let layout = Layout::resolve(config);
    let request = BuildRequest {
        kubefile: args.kubefile,
        context: args.context,
        name: args.name,
        no_cache: args.no_cache,
        ignore_error: args.ignore_error,
    };

    match args.mode {
        BuildMode::Local => {
            let image = LocalBuilder::new(layout, request).build().await?;
            println!(
                "{} built {} ({})",
                style("✓").green().bold(),
                style(&image.name).bold(),
                &image.id[..12]
            );
        }
        BuildMode::Cloud => {
            let name = request.name.clone();
            CloudBuilder::new(layout, config.cloud.clone(), request)
                .build()
                .await?;
            println!(
                "{} built {} remotely",
                style("✓").green().bold(),
                style(&name).bold()
            );
        }
    }
    Ok(())
}
