use aws_sdk_dynamodb::types::AttributeValue;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;

/// Encode DynamoDB's LastEvaluatedKey as an opaque pagination token.
///
/// Key attributes in every table here are strings or numbers, so the token is
/// base64 of a small JSON object tagging each value with its DynamoDB type.
pub fn encode_pagination_token(key: &HashMap<String, AttributeValue>) -> Option<String> {
    let mut obj = serde_json::Map::new();
    for (name, value) in key {
        let tagged = match value {
            AttributeValue::S(s) => serde_json::json!({ "S": s }),
            AttributeValue::N(n) => serde_json::json!({ "N": n }),
            _ => return None,
        };
        obj.insert(name.clone(), tagged);
    }
    Some(STANDARD.encode(serde_json::Value::Object(obj).to_string()))
}

/// Decode an opaque pagination token back into an ExclusiveStartKey.
pub fn decode_pagination_token(token: &str) -> Result<HashMap<String, AttributeValue>, String> {
    let bytes = STANDARD
        .decode(token)
        .map_err(|_| "Invalid pagination token".to_string())?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| "Invalid pagination token".to_string())?;
    let obj = value
        .as_object()
        .ok_or_else(|| "Invalid pagination token".to_string())?;

    let mut key = HashMap::new();
    for (name, tagged) in obj {
        let attr = if let Some(s) = tagged.get("S").and_then(|v| v.as_str()) {
            AttributeValue::S(s.to_string())
        } else if let Some(n) = tagged.get("N").and_then(|v| v.as_str()) {
            AttributeValue::N(n.to_string())
        } else {
            return Err("Invalid pagination token".to_string());
        };
        key.insert(name.clone(), attr);
    }
    Ok(key)
}

pub fn get_s(item: &HashMap<String, AttributeValue>, name: &str) -> String {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

pub fn get_opt_s(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
}

pub fn get_n(item: &HashMap<String, AttributeValue>, name: &str) -> i64 {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
        .unwrap_or_default()
}

pub fn get_bool(item: &HashMap<String, AttributeValue>, name: &str) -> bool {
    item.get(name)
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_token_round_trips_mixed_key() {
        let mut key = HashMap::new();
        key.insert(
            "resourceId".to_string(),
            AttributeValue::S("nb-1234".to_string()),
        );
        key.insert(
            "resourceType".to_string(),
            AttributeValue::S("notebook-instance".to_string()),
        );
        key.insert("versionId".to_string(), AttributeValue::N("7".to_string()));

        let token = encode_pagination_token(&key).unwrap();
        let decoded = decode_pagination_token(&token).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(decode_pagination_token("not base64!!").is_err());
        // valid base64, not our shape
        let token = STANDARD.encode("[1,2,3]");
        assert!(decode_pagination_token(&token).is_err());
    }
}
