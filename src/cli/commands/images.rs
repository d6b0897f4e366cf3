//! Images command

use crate::config::{Config, Layout};
use crate::error::StrataResult;
use crate::image::ImageStore;
use tracing::warn;

pub async fn images(config: &Config) -> StrataResult<()> {
    let layout = Layout::resolve(config);
    layout.ensure().await?;

    let store = ImageStore::new(layout);
    let entries = store.list().await?;
    if entries.is_empty() {
        println!("No images found");
        return Ok(());
    }

    println!("{:<32} {:<14} {:<22} LAYERS", "REPOSITORY", "IMAGE ID", "CREATED");
    for (name, id) in entries {
        match store.by_id(&id).await {
            Ok(image) => {
                println!(
                    "{:<32} {:<14} {:<22} {}",
                    name,
                    &image.id[..12.min(image.id.len())],
                    image.created.format("%Y-%m-%d %H:%M:%S"),
                    image.layers.len()
                );
            }
            Err(e) => warn!("skipping {name}: {e}"),
        }
    }
    Ok(())
}
