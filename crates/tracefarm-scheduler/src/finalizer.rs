use crate::ledger::SceneLedger;
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::path::PathBuf;
use std::sync::Arc;
use tracefarm_core::{Pixel, SceneSpec, WorkUnit};
use tracing::info;

/// Accepted result for one unit
#[derive(Debug, Clone)]
pub struct RenderedUnit {
    pub unit: WorkUnit,
    pub pixels: Vec<Pixel>,
}

/// Every accepted result of a finalized scene, in unit order
#[derive(Debug, Clone)]
pub struct RenderedScene {
    pub spec: SceneSpec,
    pub units: Vec<RenderedUnit>,
}

impl RenderedScene {
    /// Assemble the image. Scene row `y = 0` is the bottom row of the output.
    ///
    /// Pixels that fall outside their unit's range are ignored.
    pub fn compose_image(&self) -> RgbaImage {
        let SceneSpec { width, height, .. } = self.spec;
        let mut image = RgbaImage::new(width, height);

        for rendered in &self.units {
            for pixel in &rendered.pixels {
                let Some(index) = self.spec.pixel_index(pixel.x, pixel.y) else {
                    continue;
                };
                if !rendered.unit.range.contains(index) {
                    continue;
                }
                let [r, g, b] = pixel.to_rgb8();
                image.put_pixel(pixel.x, height - 1 - pixel.y, Rgba([r, g, b, 255]));
            }
        }

        image
    }
}

/// Turns a finished scene into its output artifact
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Produce the artifact and record completion. Returns the artifact name
    /// announced to workers.
    async fn finalize(&self, scene: RenderedScene) -> anyhow::Result<String>;
}

/// Writes `<image_dir>/<scene_id>.png` and marks the scene finished
pub struct PngFinalizer {
    image_dir: PathBuf,
    ledger: Arc<dyn SceneLedger>,
}

impl PngFinalizer {
    pub fn new(image_dir: PathBuf, ledger: Arc<dyn SceneLedger>) -> Self {
        PngFinalizer { image_dir, ledger }
    }
}

#[async_trait]
impl Finalizer for PngFinalizer {
    async fn finalize(&self, scene: RenderedScene) -> anyhow::Result<String> {
        let scene_id = scene.spec.id;
        let artifact = format!("{}.png", scene_id);
        let image_dir = self.image_dir.clone();
        let path = image_dir.join(&artifact);

        let written = path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            std::fs::create_dir_all(&image_dir)?;
            scene.compose_image().save(&written)?;
            Ok(())
        })
        .await??;

        info!(scene_id = %scene_id, path = %path.display(), "Wrote scene image");

        self.ledger.scene_finished(&scene_id, Some(artifact.clone()))?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tracefarm_core::{partition, SceneId};
    use uuid::Uuid;

    #[derive(Default)]
    struct FinishedLog(Mutex<Vec<(SceneId, Option<String>)>>);

    impl SceneLedger for FinishedLog {
        fn unfinished_scenes(&self) -> anyhow::Result<Vec<SceneSpec>> {
            Ok(Vec::new())
        }

        fn worker_joined(&self, _scene_id: &SceneId) -> anyhow::Result<()> {
            Ok(())
        }

        fn worker_left(&self, _scene_id: &SceneId) -> anyhow::Result<()> {
            Ok(())
        }

        fn scene_finished(&self, scene_id: &SceneId, artifact: Option<String>) -> anyhow::Result<()> {
            self.0.lock().push((*scene_id, artifact));
            Ok(())
        }
    }

    fn rendered(width: u32, height: u32, chunk: u32) -> RenderedScene {
        let spec = SceneSpec::new(Uuid::new_v4(), width, height).unwrap();
        let units = partition(width, height, chunk)
            .unwrap()
            .into_iter()
            .map(|unit| RenderedUnit {
                unit,
                pixels: (unit.range.start..unit.range.end)
                    .map(|index| {
                        let (x, y) = spec.coordinates(index).unwrap();
                        Pixel { x, y, r: 1.0, g: 0.0, b: 0.0 }
                    })
                    .collect(),
            })
            .collect();
        RenderedScene { spec, units }
    }

    #[test]
    fn test_rows_are_flipped() {
        let mut scene = rendered(2, 2, 4);
        scene.units[0].pixels = vec![Pixel { x: 0, y: 0, r: 0.0, g: 1.0, b: 0.0 }];

        let image = scene.compose_image();
        assert_eq!(*image.get_pixel(0, 1), Rgba([0, 255, 0, 255]));
        // never written
        assert_eq!(*image.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_pixels_outside_unit_are_ignored() {
        let mut scene = rendered(4, 1, 2);
        // (3, 0) belongs to unit 1, not unit 0
        scene.units[0].pixels.push(Pixel { x: 3, y: 0, r: 0.0, g: 0.0, b: 1.0 });
        scene.units[1].pixels.clear();
        // out of the image entirely
        scene.units[0].pixels.push(Pixel { x: 9, y: 9, r: 1.0, g: 1.0, b: 1.0 });

        let image = scene.compose_image();
        assert_eq!(*image.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*image.get_pixel(3, 0), Rgba([0, 0, 0, 0]));
    }

    #[tokio::test]
    async fn test_png_finalizer_writes_image_and_records() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(FinishedLog::default());
        let finalizer = PngFinalizer::new(dir.path().join("images"), ledger.clone());

        let scene = rendered(10, 5, 20);
        let scene_id = scene.spec.id;
        let artifact = finalizer.finalize(scene).await.unwrap();

        assert_eq!(artifact, format!("{}.png", scene_id));
        let written = image::open(dir.path().join("images").join(&artifact)).unwrap();
        assert_eq!((written.width(), written.height()), (10, 5));

        assert_eq!(*ledger.0.lock(), vec![(scene_id, Some(artifact))]);
    }
}
