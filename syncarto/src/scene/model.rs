//! Scene descriptors and validated scenes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::SceneError;
use crate::render::{Pipeline, ScaleRange};

/// Reference to a band: a name in the band map or a sample index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BandRef {
    Index(usize),
    Name(String),
}

impl BandRef {
    /// Sample index, when the reference is numeric.
    pub fn index(&self) -> Option<usize> {
        match self {
            BandRef::Index(i) => Some(*i),
            BandRef::Name(name) => name.trim().parse().ok(),
        }
    }
}

impl fmt::Display for BandRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandRef::Index(i) => write!(f, "{}", i),
            BandRef::Name(name) => write!(f, "{}", name),
        }
    }
}

fn default_has_overviews() -> bool {
    true
}

/// Scene definition as received from the outside world (camelCase JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDescriptor {
    pub id: String,
    #[serde(default)]
    pub bands: BTreeMap<String, String>,
    #[serde(default, rename = "isRGB")]
    pub is_rgb: bool,
    #[serde(default)]
    pub is_single: bool,
    #[serde(default = "default_has_overviews")]
    pub has_ovr: bool,
    #[serde(default)]
    pub red_band: Option<BandRef>,
    #[serde(default)]
    pub green_band: Option<BandRef>,
    #[serde(default)]
    pub blue_band: Option<BandRef>,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub range: Option<ScaleRange>,
}

/// How a scene's three colour channels are produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneKind {
    /// One RGB(A) or greyscale COG decoded directly.
    RgbComposite { url: String },
    /// One multiband COG; three of its samples are scaled from `range`
    /// (the session default when `None`).
    SingleMultiband {
        url: String,
        samples: [usize; 3],
        range: Option<ScaleRange>,
    },
    /// Three COGs, each contributing its first band.
    MultiResourceComposite {
        red: String,
        green: String,
        blue: String,
    },
}

/// A validated, immutable scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    id: String,
    bands: BTreeMap<String, String>,
    has_overviews: bool,
    kind: SceneKind,
    band_refs: Option<[BandRef; 3]>,
    pipeline: Pipeline,
    attribution: Option<String>,
}

impl Scene {
    /// Plain RGB scene for a single COG URL, identified by that URL.
    pub fn from_cog_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: url.clone(),
            bands: BTreeMap::from([("rgb".to_string(), url.clone())]),
            has_overviews: false,
            kind: SceneKind::RgbComposite { url },
            band_refs: None,
            pipeline: Pipeline::default(),
            attribution: None,
        }
    }

    /// Parse and validate a JSON scene descriptor.
    pub fn from_json(json: &str) -> Result<Self, SceneError> {
        let descriptor: SceneDescriptor =
            serde_json::from_str(json).map_err(|e| SceneError::InvalidJson(e.to_string()))?;
        Self::try_from(descriptor)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &SceneKind {
        &self.kind
    }

    pub fn bands(&self) -> &BTreeMap<String, String> {
        &self.bands
    }

    pub fn has_overviews(&self) -> bool {
        self.has_overviews
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn attribution(&self) -> Option<&str> {
        self.attribution.as_deref()
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }

    /// URL whose pyramid defines the scene's tile grid and projection.
    pub fn reference_url(&self) -> &str {
        match &self.kind {
            SceneKind::RgbComposite { url } | SceneKind::SingleMultiband { url, .. } => url,
            SceneKind::MultiResourceComposite { red, .. } => red,
        }
    }

    /// Distinct resource URLs, reference first.
    pub fn urls(&self) -> Vec<&str> {
        let all: Vec<&str> = match &self.kind {
            SceneKind::RgbComposite { url } | SceneKind::SingleMultiband { url, .. } => vec![url],
            SceneKind::MultiResourceComposite { red, green, blue } => vec![red, green, blue],
        };
        let mut urls = Vec::with_capacity(all.len());
        for url in all {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    /// Band references joined by commas, empty for RGB scenes.
    pub fn band_list(&self) -> String {
        match (&self.kind, &self.band_refs) {
            (SceneKind::RgbComposite { .. }, _) | (_, None) => String::new(),
            (_, Some(refs)) => refs
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl TryFrom<SceneDescriptor> for Scene {
    type Error = SceneError;

    fn try_from(d: SceneDescriptor) -> Result<Self, Self::Error> {
        if d.id.trim().is_empty() {
            return Err(SceneError::MissingId);
        }
        if d.is_rgb && d.is_single {
            return Err(SceneError::ConflictingKinds(d.id));
        }

        let resolve = |band: &BandRef| -> Result<String, SceneError> {
            d.bands
                .get(&band.to_string())
                .cloned()
                .ok_or_else(|| SceneError::MissingBand {
                    scene: d.id.clone(),
                    band: band.to_string(),
                })
        };
        let required = |band: &Option<BandRef>, channel: &'static str| {
            band.clone().ok_or_else(|| SceneError::MissingBandRef {
                scene: d.id.clone(),
                channel,
            })
        };
        // Single-file scenes may leave the red band implicit
        let single_url = |band: &Option<BandRef>| -> Result<String, SceneError> {
            match band {
                Some(band) => resolve(band).or_else(|e| only_band(&d.bands).ok_or(e)),
                None => only_band(&d.bands).ok_or_else(|| SceneError::MissingBandRef {
                    scene: d.id.clone(),
                    channel: "red",
                }),
            }
        };

        let (kind, band_refs) = if d.is_rgb {
            let url = single_url(&d.red_band)?;
            (SceneKind::RgbComposite { url }, None)
        } else if d.is_single {
            let url = single_url(&d.red_band)?;
            let refs = [
                required(&d.red_band, "red")?,
                required(&d.green_band, "green")?,
                required(&d.blue_band, "blue")?,
            ];
            let mut samples = [0usize; 3];
            for ((sample, band), channel) in samples.iter_mut().zip(&refs).zip(["red", "green", "blue"]) {
                *sample = band.index().ok_or_else(|| SceneError::InvalidSampleIndex {
                    scene: d.id.clone(),
                    channel,
                    value: band.to_string(),
                })?;
            }
            let kind = SceneKind::SingleMultiband {
                url,
                samples,
                range: d.range,
            };
            (kind, Some(refs))
        } else {
            let refs = [
                required(&d.red_band, "red")?,
                required(&d.green_band, "green")?,
                required(&d.blue_band, "blue")?,
            ];
            let kind = SceneKind::MultiResourceComposite {
                red: resolve(&refs[0])?,
                green: resolve(&refs[1])?,
                blue: resolve(&refs[2])?,
            };
            (kind, Some(refs))
        };

        Ok(Scene {
            id: d.id,
            bands: d.bands,
            has_overviews: d.has_ovr,
            kind,
            band_refs,
            pipeline: d.pipeline,
            attribution: d.attribution,
        })
    }
}

fn only_band(bands: &BTreeMap<String, String>) -> Option<String> {
    match bands.len() {
        1 => bands.values().next().cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Operation;

    const LANDSAT: &str = r#"{
        "id": "LC08_L1TP_189026",
        "bands": {
            "B4": "https://example.com/B4.TIF",
            "B3": "https://example.com/B3.TIF",
            "B2": "https://example.com/B2.TIF"
        },
        "redBand": "B4",
        "greenBand": "B3",
        "blueBand": "B2",
        "pipeline": [{"op": "sigmoidal-contrast", "contrast": 50, "bias": 0.16}],
        "attribution": "Landsat 8"
    }"#;

    #[test]
    fn test_multi_resource_scene() {
        let scene = Scene::from_json(LANDSAT).unwrap();
        assert_eq!(scene.id(), "LC08_L1TP_189026");
        assert!(scene.has_overviews());
        assert_eq!(
            scene.kind(),
            &SceneKind::MultiResourceComposite {
                red: "https://example.com/B4.TIF".to_string(),
                green: "https://example.com/B3.TIF".to_string(),
                blue: "https://example.com/B2.TIF".to_string(),
            }
        );
        assert_eq!(scene.reference_url(), "https://example.com/B4.TIF");
        assert_eq!(scene.urls().len(), 3);
        assert_eq!(scene.band_list(), "B4,B3,B2");
        assert_eq!(scene.attribution(), Some("Landsat 8"));
        assert!(matches!(
            scene.pipeline().operations()[0],
            Operation::SigmoidalContrast { .. }
        ));
    }

    #[test]
    fn test_rgb_scene() {
        let scene = Scene::from_json(
            r#"{"id": "rgb", "bands": {"0": "https://example.com/rgb.tif"}, "isRGB": true, "hasOvr": false}"#,
        )
        .unwrap();
        assert_eq!(
            scene.kind(),
            &SceneKind::RgbComposite {
                url: "https://example.com/rgb.tif".to_string()
            }
        );
        assert!(!scene.has_overviews());
        assert_eq!(scene.band_list(), "");
    }

    #[test]
    fn test_single_multiband_scene() {
        let scene = Scene::from_json(
            r#"{
                "id": "ndvi",
                "bands": {"0": "https://example.com/ndvi.tif"},
                "isSingle": true,
                "redBand": 0, "greenBand": 0, "blueBand": "1",
                "range": {"min": -1.0, "max": 1.0}
            }"#,
        )
        .unwrap();
        assert_eq!(
            scene.kind(),
            &SceneKind::SingleMultiband {
                url: "https://example.com/ndvi.tif".to_string(),
                samples: [0, 0, 1],
                range: Some(ScaleRange::new(-1.0, 1.0)),
            }
        );
        assert_eq!(scene.urls(), vec!["https://example.com/ndvi.tif"]);
        assert_eq!(scene.band_list(), "0,0,1");
    }

    #[test]
    fn test_single_multiband_without_range() {
        let scene = Scene::from_json(
            r#"{"id": "s", "bands": {"x": "u"}, "isSingle": true, "redBand": 2, "greenBand": 1, "blueBand": 0}"#,
        )
        .unwrap();
        match scene.kind() {
            SceneKind::SingleMultiband { url, samples, range } => {
                assert_eq!(url, "u");
                assert_eq!(*samples, [2, 1, 0]);
                assert_eq!(*range, None);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_errors() {
        assert_eq!(
            Scene::from_json(r#"{"id": ""}"#),
            Err(SceneError::MissingId)
        );
        assert!(matches!(
            Scene::from_json(r#"{"id": "a", "isRGB": true, "isSingle": true}"#),
            Err(SceneError::ConflictingKinds(_))
        ));
        assert!(matches!(
            Scene::from_json(r#"{"id": "a", "bands": {"B4": "u"}, "redBand": "B4", "greenBand": "B3", "blueBand": "B4"}"#),
            Err(SceneError::MissingBand { .. })
        ));
        assert!(matches!(
            Scene::from_json(r#"{"id": "a", "bands": {"B4": "u"}, "redBand": "B4"}"#),
            Err(SceneError::MissingBandRef { channel: "green", .. })
        ));
        assert!(matches!(
            Scene::from_json(r#"{"id": "a", "bands": {"x": "u"}, "isSingle": true, "redBand": "nir", "greenBand": 1, "blueBand": 2}"#),
            Err(SceneError::InvalidSampleIndex { channel: "red", .. })
        ));
        assert!(matches!(
            Scene::from_json("not json"),
            Err(SceneError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_from_cog_url() {
        let scene = Scene::from_cog_url("https://example.com/a.tif");
        assert_eq!(scene.id(), "https://example.com/a.tif");
        assert!(!scene.has_overviews());
        assert!(scene.pipeline().is_empty());
        assert_eq!(scene.reference_url(), "https://example.com/a.tif");
    }
}
