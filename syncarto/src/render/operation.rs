//! Declarative processing operations.
//!
//! Operations are deserialized from scene descriptors:
//!
//! ```json
//! [
//!   { "op": "gamma", "bands": ["r", "g"], "value": 1.8 },
//!   { "op": "sigmoidal-contrast", "contrast": 10, "bias": 0.5 }
//! ]
//! ```
//!
//! and have a compact text form used in permalinks:
//!
//! ```text
//! gamma(rg,1.8);sigmoidal(all,10,0.5)
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Smallest bias used by the sigmoidal curve.
pub const MIN_SIGMOIDAL_BIAS: f64 = 1e-6;

/// One colour channel of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    /// Position in an RGB triple.
    pub fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }

    fn letter(self) -> char {
        match self {
            Channel::Red => 'r',
            Channel::Green => 'g',
            Channel::Blue => 'b',
        }
    }

    /// Parse `r`/`red`/`1` style names (case-insensitive, 1-based indices).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "r" | "red" | "1" => Some(Channel::Red),
            "g" | "green" | "2" => Some(Channel::Green),
            "b" | "blue" | "3" => Some(Channel::Blue),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A set of channels an operation is restricted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChannelSet([bool; 3]);

impl ChannelSet {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut set = [false; 3];
        for channel in channels {
            set[channel.index()] = true;
        }
        Self(set)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0[channel.index()]
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|&c| c)
    }

    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl fmt::Display for ChannelSet {
    /// Channel letters, or `none` for the empty set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for channel in self.iter() {
            write!(f, "{}", channel)?;
        }
        Ok(())
    }
}

impl FromStr for ChannelSet {
    type Err = PipelineParseError;

    /// Parses `rgb`, `r,b`, `red,green`, `1,3` or `none`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineParseError::InvalidBands(s.to_string());
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(ChannelSet::default());
        }
        let channels: Option<Vec<Channel>> = if trimmed.contains(',') {
            trimmed.split(',').map(Channel::parse).collect()
        } else if let Some(channel) = Channel::parse(trimmed) {
            Some(vec![channel])
        } else {
            trimmed
                .chars()
                .map(|c| Channel::parse(c.encode_utf8(&mut [0; 4])))
                .collect()
        };
        channels.map(ChannelSet::new).ok_or_else(invalid)
    }
}

impl Serialize for ChannelSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for channel in self.iter() {
            seq.serialize_element(&channel.letter().to_string())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ChannelSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ChannelRepr {
            Index(u64),
            Name(String),
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum SetRepr {
            List(Vec<ChannelRepr>),
            Text(String),
        }

        let channel = |repr: ChannelRepr| -> Result<Channel, D::Error> {
            let name = match repr {
                ChannelRepr::Index(i) => i.to_string(),
                ChannelRepr::Name(n) => n,
            };
            Channel::parse(&name)
                .ok_or_else(|| de::Error::custom(format!("unknown channel '{}'", name)))
        };

        match SetRepr::deserialize(deserializer)? {
            SetRepr::List(list) => Ok(ChannelSet::new(
                list.into_iter().map(channel).collect::<Result<Vec<_>, _>>()?,
            )),
            SetRepr::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

/// One processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    /// Sigmoidal contrast curve; positive `contrast` steepens, negative flattens.
    SigmoidalContrast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bands: Option<ChannelSet>,
        contrast: f64,
        bias: f64,
    },
    /// Power-law correction `x^(1/value)`.
    Gamma {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bands: Option<ChannelSet>,
        value: f64,
    },
    /// Any other operation kind; applies as a no-op.
    #[serde(other)]
    Unsupported,
}

impl Operation {
    /// Whether the operation changes the given channel.
    pub fn applies_to(&self, channel: Channel) -> bool {
        match self {
            Operation::SigmoidalContrast { bands, .. } | Operation::Gamma { bands, .. } => {
                bands.map_or(true, |set| set.contains(channel))
            }
            Operation::Unsupported => false,
        }
    }

    /// Apply the operation to a channel value in `[0, 1]`.
    pub fn apply(&self, x: f64) -> f64 {
        match *self {
            Operation::SigmoidalContrast { contrast, bias, .. } => sigmoidal(x, contrast, bias),
            Operation::Gamma { value, .. } => gamma(x, value),
            Operation::Unsupported => x,
        }
    }
}

/// Sigmoidal contrast of `x` with contrast `beta` around bias `alpha`.
///
/// Maps 0 to 0 and 1 to 1; `beta == 0` is the identity and negative values
/// use the inverse curve.
pub fn sigmoidal(x: f64, beta: f64, alpha: f64) -> f64 {
    if beta == 0.0 || !beta.is_finite() {
        return x;
    }
    let alpha = alpha.max(MIN_SIGMOIDAL_BIAS);
    let low = 1.0 / (1.0 + (beta * alpha).exp());

    let y = if beta > 0.0 {
        let numerator = 1.0 / (1.0 + (beta * (alpha - x)).exp()) - low;
        let denominator = 1.0 / (1.0 + (beta * (alpha - 1.0)).exp()) - low;
        numerator / denominator
    } else {
        let high = 1.0 / (1.0 + (beta * alpha - beta).exp());
        let inner = 1.0 / (x * high - x * low + low) - 1.0;
        (beta * alpha - inner.ln()) / beta
    };

    if y.is_finite() {
        y
    } else {
        x
    }
}

/// Gamma correction `x^(1/g)`; non-positive or non-finite `g` is a no-op.
pub fn gamma(x: f64, g: f64) -> f64 {
    if g <= 0.0 || !g.is_finite() {
        return x;
    }
    x.max(0.0).powf(1.0 / g)
}

impl fmt::Display for Operation {
    /// Compact form; unsupported operations render as an empty string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bands = |bands: &Option<ChannelSet>| match bands {
            Some(set) => set.to_string(),
            None => "all".to_string(),
        };
        match self {
            Operation::SigmoidalContrast {
                bands: b,
                contrast,
                bias,
            } => write!(f, "sigmoidal({},{},{})", bands(b), contrast, bias),
            Operation::Gamma { bands: b, value } => write!(f, "gamma({},{})", bands(b), value),
            Operation::Unsupported => Ok(()),
        }
    }
}

/// Errors parsing the compact pipeline form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineParseError {
    #[error("unrecognised pipeline step '{0}'")]
    InvalidStep(String),
    #[error("invalid band list '{0}'")]
    InvalidBands(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}

fn step_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(sigmoidal|gamma)\s*\(([^()]*)\)\s*$").expect("valid step regex")
    })
}

impl FromStr for Operation {
    type Err = PipelineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineParseError::InvalidStep(s.to_string());
        let captures = step_pattern().captures(s).ok_or_else(invalid)?;
        let args: Vec<&str> = captures[2].split(',').map(str::trim).collect();

        let number = |text: &str| {
            text.parse::<f64>()
                .map_err(|_| PipelineParseError::InvalidNumber(text.to_string()))
        };

        // Bands may themselves contain commas ("r,g"), so numbers are taken
        // from the end of the argument list.
        let (bands, numbers) = match &captures[1] {
            "sigmoidal" if args.len() >= 3 => args.split_at(args.len() - 2),
            "gamma" if args.len() >= 2 => args.split_at(args.len() - 1),
            _ => return Err(invalid()),
        };
        let bands = match bands.join(",").as_str() {
            "all" | "" => None,
            list => Some(list.parse::<ChannelSet>()?),
        };

        Ok(match &captures[1] {
            "sigmoidal" => Operation::SigmoidalContrast {
                bands,
                contrast: number(numbers[0])?,
                bias: number(numbers[1])?,
            },
            _ => Operation::Gamma {
                bands,
                value: number(numbers[0])?,
            },
        })
    }
}

/// Ordered list of operations applied after channel composition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline(Vec<Operation>);

impl Pipeline {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self(operations)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Run every operation applying to `channel`, in order, on `x`.
    pub fn apply(&self, channel: Channel, x: f64) -> f64 {
        self.0
            .iter()
            .filter(|op| op.applies_to(channel))
            .fold(x, |value, op| op.apply(value))
    }
}

impl From<Vec<Operation>> for Pipeline {
    fn from(operations: Vec<Operation>) -> Self {
        Self(operations)
    }
}

impl fmt::Display for Pipeline {
    /// Compact form: steps joined by `;`, unsupported steps omitted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self
            .0
            .iter()
            .filter(|op| !matches!(op, Operation::Unsupported))
            .map(|op| op.to_string())
            .collect();
        write!(f, "{}", steps.join(";"))
    }
}

impl FromStr for Pipeline {
    type Err = PipelineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(';')
            .map(str::trim)
            .filter(|step| !step.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_deserialize_operations() {
        let json = r#"[
            {"op": "sigmoidal-contrast", "bands": ["r", "green", 3], "contrast": 10, "bias": 0.5},
            {"op": "gamma", "value": 2.0},
            {"op": "saturation", "value": 1.3}
        ]"#;
        let pipeline: Pipeline = serde_json::from_str(json).unwrap();

        assert_eq!(pipeline.len(), 3);
        assert_eq!(
            pipeline.operations()[0],
            Operation::SigmoidalContrast {
                bands: Some(ChannelSet::new(Channel::ALL)),
                contrast: 10.0,
                bias: 0.5,
            }
        );
        assert_eq!(
            pipeline.operations()[1],
            Operation::Gamma {
                bands: None,
                value: 2.0
            }
        );
        assert_eq!(pipeline.operations()[2], Operation::Unsupported);
    }

    #[test]
    fn test_band_string_forms() {
        let rb: ChannelSet = "rb".parse().unwrap();
        assert!(rb.contains(Channel::Red) && rb.contains(Channel::Blue));
        assert!(!rb.contains(Channel::Green));
        assert_eq!("red,blue".parse::<ChannelSet>().unwrap(), rb);
        assert_eq!("1,3".parse::<ChannelSet>().unwrap(), rb);
        assert!("x".parse::<ChannelSet>().is_err());
    }

    #[test]
    fn test_empty_band_set_stays_empty() {
        let op = Operation::Gamma {
            bands: Some(ChannelSet::default()),
            value: 2.0,
        };
        assert_eq!(op.to_string(), "gamma(none,2)");

        let parsed: Operation = op.to_string().parse().unwrap();
        assert_eq!(parsed, op);
        assert!(!parsed.applies_to(Channel::Red));
    }

    #[test]
    fn test_sigmoidal_fixes_endpoints() {
        for contrast in [-10.0, -3.0, 3.0, 10.0] {
            assert!(sigmoidal(0.0, contrast, 0.5).abs() < 1e-6);
            assert!((sigmoidal(1.0, contrast, 0.5) - 1.0).abs() < 1e-6);
        }
        assert_eq!(sigmoidal(0.3, 0.0, 0.5), 0.3);
    }

    #[test]
    fn test_sigmoidal_steepens_around_bias() {
        assert!(sigmoidal(0.3, 10.0, 0.5) < 0.3);
        assert!(sigmoidal(0.7, 10.0, 0.5) > 0.7);
        // Inverse curve flattens
        assert!(sigmoidal(0.3, -10.0, 0.5) > 0.3);
    }

    #[test]
    fn test_gamma() {
        assert!((gamma(0.25, 2.0) - 0.5).abs() < EPS);
        assert_eq!(gamma(0.25, 0.0), 0.25);
        assert_eq!(gamma(0.25, -1.0), 0.25);
    }

    #[test]
    fn test_pipeline_order_matters() {
        let gamma_first = Pipeline::new(vec![
            Operation::Gamma {
                bands: None,
                value: 2.0,
            },
            Operation::SigmoidalContrast {
                bands: None,
                contrast: 10.0,
                bias: 0.5,
            },
        ]);
        let sigmoidal_first = Pipeline::new(gamma_first.operations().iter().rev().cloned().collect());

        let x = 0.3;
        let expected = sigmoidal(gamma(x, 2.0), 10.0, 0.5);
        assert!((gamma_first.apply(Channel::Red, x) - expected).abs() < EPS);
        assert!(
            (gamma_first.apply(Channel::Red, x) - sigmoidal_first.apply(Channel::Red, x)).abs()
                > 1e-3
        );
    }

    #[test]
    fn test_band_restriction() {
        let pipeline = Pipeline::new(vec![Operation::Gamma {
            bands: Some(ChannelSet::new([Channel::Green])),
            value: 2.0,
        }]);
        assert_eq!(pipeline.apply(Channel::Red, 0.25), 0.25);
        assert!((pipeline.apply(Channel::Green, 0.25) - 0.5).abs() < EPS);
    }

    #[test]
    fn test_compact_form() {
        let pipeline = Pipeline::new(vec![
            Operation::SigmoidalContrast {
                bands: None,
                contrast: 10.0,
                bias: 0.5,
            },
            Operation::Unsupported,
            Operation::Gamma {
                bands: Some(ChannelSet::new([Channel::Red, Channel::Green])),
                value: 1.8,
            },
        ]);
        assert_eq!(pipeline.to_string(), "sigmoidal(all,10,0.5);gamma(rg,1.8)");

        let parsed: Pipeline = "sigmoidal(all,10,0.5); gamma(rg,1.8)".parse().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.operations()[1], pipeline.operations()[2]);
    }

    #[test]
    fn test_compact_form_with_comma_bands() {
        let op: Operation = "sigmoidal(r,g,5,0.2)".parse().unwrap();
        assert_eq!(
            op,
            Operation::SigmoidalContrast {
                bands: Some(ChannelSet::new([Channel::Red, Channel::Green])),
                contrast: 5.0,
                bias: 0.2,
            }
        );
    }

    #[test]
    fn test_compact_form_errors() {
        assert!(matches!(
            "blur(all,2)".parse::<Operation>(),
            Err(PipelineParseError::InvalidStep(_))
        ));
        assert!(matches!(
            "gamma(all,x)".parse::<Operation>(),
            Err(PipelineParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            "gamma(2)".parse::<Operation>(),
            Err(PipelineParseError::InvalidStep(_))
        ));
        assert!("".parse::<Pipeline>().unwrap().is_empty());
    }
}
