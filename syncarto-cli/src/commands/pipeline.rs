//! Pipeline command - translate the compact pipeline form to JSON.

use syncarto::render::Pipeline;

use crate::error::CliError;

/// Parse `compact` and return its operations as pretty JSON.
pub fn to_json(compact: &str) -> Result<String, CliError> {
    let pipeline: Pipeline = compact.parse()?;
    Ok(serde_json::to_string_pretty(&pipeline)?)
}

/// Run the pipeline command.
pub fn run(compact: &str) -> Result<(), CliError> {
    println!("{}", to_json(compact)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_to_json() {
        let json = to_json("sigmoidal(rgb,10,0.35);gamma(b,0.95)").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let ops = value.as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0]["op"], "sigmoidal-contrast");
        assert_eq!(ops[0]["contrast"], 10.0);
        assert_eq!(ops[1]["op"], "gamma");
        assert_eq!(ops[1]["bands"], serde_json::json!(["b"]));
    }

    #[test]
    fn test_invalid_compact_form() {
        assert!(matches!(to_json("blur(2)"), Err(CliError::Pipeline(_))));
    }
}
