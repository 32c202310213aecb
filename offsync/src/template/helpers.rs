//! Handlebars helpers exposing the utility namespace to templates.
//!
//! Every helper is registered under `<namespace>_<method>`, e.g.
//! `{{util_toJson ctx.args}}` or `{{dynamodb_toDynamoDBJson ctx.args.id}}`,
//! and can also be used as a subexpression.

use handlebars::{
    Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, ScopedJson,
};
use log::debug;
use serde_json::Value as JsonValue;

use crate::util::{dynamodb, list, map, UtilError};
use crate::value::{is_truthy, to_js_string};
use crate::TemplateContext;

type HelperFn = fn(&TemplateContext, &[JsonValue]) -> Result<JsonValue, UtilError>;

/// A helper bound to the context of the render it belongs to.
pub struct BoundHelper {
    name: &'static str,
    ctx: TemplateContext,
    f: HelperFn,
}

impl HelperDef for BoundHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'reg, 'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'reg, 'rc>, RenderError> {
        let args = h
            .params()
            .iter()
            .map(|p| p.value().clone())
            .collect::<Vec<JsonValue>>();
        (self.f)(&self.ctx, &args)
            .map(ScopedJson::Derived)
            .map_err(|e| RenderError::new(format!("{}: {}", self.name, e)))
    }
}

/// Registers all helpers, bound to `ctx`.
pub fn register(hb: &mut Handlebars, ctx: &TemplateContext) {
    for &(name, f) in HELPERS {
        hb.register_helper(
            name,
            Box::new(BoundHelper {
                name,
                ctx: ctx.clone(),
                f,
            }),
        );
    }
}

/// The names of all registered helpers.
pub fn names() -> impl Iterator<Item = &'static str> {
    HELPERS.iter().map(|(name, _)| *name)
}

const HELPERS: &[(&str, HelperFn)] = &[
    ("util_error", util_error),
    ("util_appendError", util_append_error),
    ("util_validate", util_validate),
    ("util_unauthorized", |ctx, _| Err(ctx.util().unauthorized())),
    ("util_isNull", |ctx, a| Ok(ctx.util().is_null(arg(a, 0)).into())),
    ("util_isNullOrEmpty", |ctx, a| {
        Ok(ctx.util().is_null_or_empty(arg(a, 0)).into())
    }),
    ("util_isNullOrBlank", |ctx, a| {
        Ok(ctx.util().is_null_or_blank(arg(a, 0)).into())
    }),
    ("util_defaultIfNull", |ctx, a| {
        Ok(ctx.util().default_if_null(arg(a, 0), arg(a, 1)))
    }),
    ("util_defaultIfNullOrEmpty", |ctx, a| {
        Ok(ctx.util().default_if_null_or_empty(arg(a, 0), arg(a, 1)))
    }),
    ("util_defaultIfNullOrBlank", |ctx, a| {
        Ok(ctx.util().default_if_null_or_blank(arg(a, 0), arg(a, 1)))
    }),
    ("util_isString", |ctx, a| Ok(ctx.util().is_string(arg(a, 0)).into())),
    ("util_isNumber", |ctx, a| Ok(ctx.util().is_number(arg(a, 0)).into())),
    ("util_isBoolean", |ctx, a| Ok(ctx.util().is_boolean(arg(a, 0)).into())),
    ("util_isList", |ctx, a| Ok(ctx.util().is_list(arg(a, 0)).into())),
    ("util_isMap", |ctx, a| Ok(ctx.util().is_map(arg(a, 0)).into())),
    ("util_typeOf", |ctx, a| Ok(ctx.util().type_of(arg(a, 0)).into())),
    ("util_matches", |ctx, a| {
        Ok(ctx.util().matches(&str_arg(a, 0), &str_arg(a, 1))?.into())
    }),
    ("util_escapeJavaScript", |ctx, a| {
        Ok(ctx.util().escape_javascript(&str_arg(a, 0)).into())
    }),
    ("util_urlEncode", |ctx, a| Ok(ctx.util().url_encode(&str_arg(a, 0)).into())),
    ("util_urlDecode", |ctx, a| Ok(ctx.util().url_decode(&str_arg(a, 0))?.into())),
    ("util_base64Encode", |ctx, a| {
        Ok(ctx.util().base64_encode(&str_arg(a, 0)).into())
    }),
    ("util_base64Decode", |ctx, a| {
        Ok(ctx.util().base64_decode(&str_arg(a, 0))?.into())
    }),
    ("util_parseJson", |ctx, a| ctx.util().parse_json(&str_arg(a, 0))),
    ("util_toJson", |ctx, a| Ok(ctx.util().to_json(arg(a, 0)).into())),
    ("util_autoId", |ctx, _| Ok(ctx.util().auto_id().into())),
    ("util_quiet", quiet),
    ("util_qr", quiet),
    ("time_nowISO8601", |ctx, _| Ok(ctx.util().time().now_iso8601().into())),
    ("time_nowEpochSeconds", |ctx, _| {
        Ok(ctx.util().time().now_epoch_seconds().into())
    }),
    ("time_nowEpochMilliSeconds", |ctx, _| {
        Ok(ctx.util().time().now_epoch_milli_seconds().into())
    }),
    ("time_nowFormatted", |ctx, a| {
        let tz = opt_str_arg(a, 1);
        Ok(ctx
            .util()
            .time()
            .now_formatted(&str_arg(a, 0), tz.as_deref())?
            .into())
    }),
    ("time_parseFormattedToEpochMilliSeconds", |ctx, _| {
        Ok(ctx.util().time().parse_formatted_to_epoch_milli_seconds()?.into())
    }),
    ("time_parseISO8601ToEpochMilliSeconds", |ctx, a| {
        Ok(ctx
            .util()
            .time()
            .parse_iso8601_to_epoch_milli_seconds(&str_arg(a, 0))?
            .into())
    }),
    ("time_epochMilliSecondsToSeconds", |ctx, a| {
        Ok(ctx
            .util()
            .time()
            .epoch_milli_seconds_to_seconds(int_arg(a, 0)?)
            .into())
    }),
    ("time_epochMilliSecondsToISO8601", |ctx, a| {
        Ok(ctx
            .util()
            .time()
            .epoch_milli_seconds_to_iso8601(int_arg(a, 0)?)?
            .into())
    }),
    ("time_epochMilliSecondsToFormatted", |ctx, a| {
        Ok(ctx
            .util()
            .time()
            .epoch_milli_seconds_to_formatted(int_arg(a, 0)?, &str_arg(a, 1))?
            .into())
    }),
    ("list_copyAndRetainAll", |_, a| {
        Ok(list::copy_and_retain_all(&list_arg(a, 0), &list_arg(a, 1)).into())
    }),
    ("list_copyAndRemoveAll", |_, a| {
        Ok(list::copy_and_remove_all(&list_arg(a, 0), &list_arg(a, 1)).into())
    }),
    ("map_copyAndRetainAllKeys", |_, a| {
        map::copy_and_retain_all_keys(arg(a, 0), &list_arg(a, 1))
    }),
    ("map_copyAndRemoveAllKeys", |_, a| {
        map::copy_and_remove_all_keys(arg(a, 0), &list_arg(a, 1))
    }),
    ("dynamodb_toDynamoDB", |_, a| Ok(dynamodb::to_dynamodb(arg(a, 0)).to_json())),
    ("dynamodb_toDynamoDBJson", |_, a| {
        Ok(dynamodb::to_dynamodb(arg(a, 0)).to_json_string().into())
    }),
    ("dynamodb_toString", |_, a| Ok(dynamodb::to_string(arg(a, 0)).to_json())),
    ("dynamodb_toStringJson", |_, a| {
        Ok(dynamodb::to_string(arg(a, 0)).to_json_string().into())
    }),
    ("dynamodb_toNumber", |_, a| Ok(dynamodb::to_number(arg(a, 0))?.to_json())),
    ("dynamodb_toNumberJson", |_, a| {
        Ok(dynamodb::to_number(arg(a, 0))?.to_json_string().into())
    }),
    ("dynamodb_toBinary", |_, a| Ok(dynamodb::to_binary(arg(a, 0)).to_json())),
    ("dynamodb_toBinaryJson", |_, a| {
        Ok(dynamodb::to_binary(arg(a, 0)).to_json_string().into())
    }),
    ("dynamodb_toBoolean", |_, a| Ok(dynamodb::to_boolean(arg(a, 0)).to_json())),
    ("dynamodb_toBooleanJson", |_, a| {
        Ok(dynamodb::to_boolean(arg(a, 0)).to_json_string().into())
    }),
    ("dynamodb_toNull", |_, _| Ok(dynamodb::to_null().to_json())),
    ("dynamodb_toNullJson", |_, _| Ok(dynamodb::to_null().to_json_string().into())),
    ("dynamodb_toList", |_, a| Ok(dynamodb::to_list(arg(a, 0))?.to_json())),
    ("dynamodb_toListJson", |_, a| {
        Ok(dynamodb::to_list(arg(a, 0))?.to_json_string().into())
    }),
    ("dynamodb_toMap", |_, a| Ok(dynamodb::to_map(arg(a, 0))?.to_json())),
    ("dynamodb_toMapJson", |_, a| {
        Ok(dynamodb::to_map(arg(a, 0))?.to_json_string().into())
    }),
    ("dynamodb_toMapValues", |_, a| {
        let values = dynamodb::to_map_values(arg(a, 0))?;
        Ok(serde_json::to_value(values).unwrap_or(JsonValue::Null))
    }),
    ("dynamodb_toMapValuesJson", |_, a| {
        let values = dynamodb::to_map_values(arg(a, 0))?;
        Ok(serde_json::to_string(&values).unwrap_or_default().into())
    }),
    ("dynamodb_toStringSet", |_, a| {
        Ok(dynamodb::to_string_set(arg(a, 0)).to_json())
    }),
    ("dynamodb_toStringSetJson", |_, a| {
        Ok(dynamodb::to_string_set(arg(a, 0)).to_json_string().into())
    }),
    ("dynamodb_toNumberSet", |_, a| {
        Ok(dynamodb::to_number_set(arg(a, 0))?.to_json())
    }),
    ("dynamodb_toNumberSetJson", |_, a| {
        Ok(dynamodb::to_number_set(arg(a, 0))?.to_json_string().into())
    }),
    ("dynamodb_toBinarySet", |_, a| {
        Ok(dynamodb::to_binary_set(arg(a, 0)).to_json())
    }),
    ("dynamodb_toBinarySetJson", |_, a| {
        Ok(dynamodb::to_binary_set(arg(a, 0)).to_json_string().into())
    }),
    ("dynamodb_toS3Object", |_, _| Ok(dynamodb::to_s3_object()?.to_json())),
    ("dynamodb_toS3ObjectJson", |_, _| Ok(dynamodb::to_s3_object_json()?.into())),
    ("dynamodb_fromS3ObjectJson", |_, _| dynamodb::from_s3_object_json()),
    ("stash_put", stash_put),
    ("console", console),
];

static NULL: JsonValue = JsonValue::Null;

fn arg(args: &[JsonValue], i: usize) -> &JsonValue {
    args.get(i).unwrap_or(&NULL)
}

fn str_arg(args: &[JsonValue], i: usize) -> String {
    match arg(args, i) {
        JsonValue::Null => String::new(),
        other => to_js_string(other),
    }
}

fn opt_str_arg(args: &[JsonValue], i: usize) -> Option<String> {
    match arg(args, i) {
        JsonValue::Null => None,
        other => Some(to_js_string(other)),
    }
}

fn opt_arg(args: &[JsonValue], i: usize) -> Option<JsonValue> {
    match arg(args, i) {
        JsonValue::Null => None,
        other => Some(other.clone()),
    }
}

fn int_arg(args: &[JsonValue], i: usize) -> Result<i64, UtilError> {
    let value = arg(args, i);
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| UtilError::Invalid(format!("{} is not an integer", n))),
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| UtilError::Invalid(format!("\"{}\" is not an integer", s))),
        other => Err(UtilError::Invalid(format!(
            "expected an integer, but got a value of type {}",
            crate::ValueType::of(other)
        ))),
    }
}

fn list_arg(args: &[JsonValue], i: usize) -> Vec<JsonValue> {
    match arg(args, i) {
        JsonValue::Array(arr) => arr.clone(),
        JsonValue::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn util_error(ctx: &TemplateContext, args: &[JsonValue]) -> Result<JsonValue, UtilError> {
    Err(ctx.util().error(
        str_arg(args, 0),
        opt_str_arg(args, 1),
        opt_arg(args, 2),
        opt_arg(args, 3),
    ))
}

fn util_append_error(ctx: &TemplateContext, args: &[JsonValue]) -> Result<JsonValue, UtilError> {
    Ok(ctx
        .util()
        .append_error(
            str_arg(args, 0),
            opt_str_arg(args, 1),
            opt_arg(args, 2),
            opt_arg(args, 3),
        )
        .into())
}

fn util_validate(ctx: &TemplateContext, args: &[JsonValue]) -> Result<JsonValue, UtilError> {
    Ok(ctx
        .util()
        .validate(
            is_truthy(arg(args, 0)),
            str_arg(args, 1),
            opt_str_arg(args, 2),
            opt_arg(args, 3),
        )?
        .into())
}

fn quiet(_: &TemplateContext, _: &[JsonValue]) -> Result<JsonValue, UtilError> {
    Ok(JsonValue::String(String::new()))
}

fn stash_put(ctx: &TemplateContext, args: &[JsonValue]) -> Result<JsonValue, UtilError> {
    let key = match arg(args, 0) {
        JsonValue::String(s) => s.clone(),
        other => {
            return Err(UtilError::Invalid(format!(
                "stash keys must be strings, but got a value of type {}",
                crate::ValueType::of(other)
            )))
        }
    };
    ctx.stash().put(key, arg(args, 1).clone());
    Ok(JsonValue::String(String::new()))
}

fn console(_: &TemplateContext, args: &[JsonValue]) -> Result<JsonValue, UtilError> {
    let parts = args
        .iter()
        .map(|v| match v {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<String>>();
    debug!("console: {}", parts.join(" "));
    Ok(JsonValue::String(String::new()))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[JsonValue]) -> (TemplateContext, Result<JsonValue, UtilError>) {
        let ctx = crate::context::test_context();
        let f = HELPERS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| *f)
            .unwrap();
        let result = f(&ctx, args);
        (ctx, result)
    }

    #[test]
    fn helper_names_are_unique() {
        let mut all = names().collect::<Vec<_>>();
        let count = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), count);
    }

    #[test]
    fn error_helper_records_optional_fields() {
        let (ctx, result) = call("util_error", &[json!("bad input"), json!("BadRequest")]);
        assert!(result.is_err());
        let errors = ctx.util().errors();
        assert_eq!(errors[0].message, "bad input");
        assert_eq!(errors[0].error_type.as_deref(), Some("BadRequest"));
        assert_eq!(errors[0].data, JsonValue::Null);
    }

    #[test]
    fn validate_uses_truthiness() {
        let (ctx, result) = call("util_validate", &[json!(1), json!("fine")]);
        assert_eq!(result.unwrap(), json!(""));
        assert!(!ctx.util().has_errors());
        let (ctx, result) = call("util_validate", &[json!(""), json!("empty")]);
        assert!(result.is_err());
        assert_eq!(ctx.util().errors()[0].message, "empty");
    }

    #[test]
    fn stash_put_mutates_the_shared_stash() {
        let (ctx, result) = call("stash_put", &[json!("k"), json!([1, 2])]);
        assert_eq!(result.unwrap(), json!(""));
        assert_eq!(ctx.stash().get("k"), Some(json!([1, 2])));
        let (_, result) = call("stash_put", &[json!(1), json!(2)]);
        assert!(result.is_err());
    }

    #[test]
    fn time_helpers_accept_numeric_strings() {
        let (_, result) = call("time_epochMilliSecondsToSeconds", &[json!("1500")]);
        assert_eq!(result.unwrap(), json!(1));
        let (_, result) = call("time_epochMilliSecondsToSeconds", &[json!({})]);
        assert!(result.is_err());
    }

    #[test]
    fn dynamodb_json_helpers_produce_strings() {
        let (_, result) = call("dynamodb_toDynamoDBJson", &[json!(5)]);
        assert_eq!(result.unwrap(), json!("{\"N\":\"5\"}"));
        let (_, result) = call("dynamodb_toMapValues", &[json!({"a": "x"})]);
        assert_eq!(result.unwrap(), json!({"a": {"S": "x"}}));
    }
}
