//! Inspect command

use crate::cli::args::InspectArgs;
use crate::config::{Config, Layout};
use crate::error::StrataResult;
use crate::image::ImageStore;

pub async fn inspect(args: InspectArgs, config: &Config) -> StrataResult<()> {
    let layout = Layout::resolve(config);
    layout.ensure().await?;

    let store = ImageStore::new(layout);
    let image = match store.by_name(&args.image).await {
        Ok(image) => image,
        // Fall back to treating the argument as an image id
        Err(name_err) => store.by_id(&args.image).await.map_err(|_| name_err)?,
    };

    print!("{}", serde_yaml::to_string(&image)?);
    Ok(())
}
