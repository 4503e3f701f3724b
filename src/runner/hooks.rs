//! Post-hook runners: `dump` and `test`.
//!
//! Hooks run after the dispatch in a fixed order (dump, then bind, then
//! test); `bind` mutates the store and lives with it in the operator.

use std::io::Write;

use serde_json::Value;

use crate::errors::{Error, Result};
use crate::expr::{self, Env};

/// Serialize the expression result to the writer: strings print raw,
/// everything else as pretty JSON.
pub fn run_dump(expr_src: &str, env: &Env, out: &mut dyn Write) -> Result<()> {
    let value = expr::eval(expr_src, env)?;
    let rendered = match &value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other)
            .map_err(|e| Error::Expr(format!("cannot serialize dump value: {e}")))?,
    };
    writeln!(out, "{rendered}")?;
    Ok(())
}

/// Assert a boolean condition; failure carries the evaluated tree.
pub fn run_test(cond: &str, env: &Env) -> Result<()> {
    if expr::eval_cond(cond, env)? {
        return Ok(());
    }
    Err(Error::Assertion {
        condition: cond.to_string(),
        tree: expr::build_tree(cond, env)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::default_funcs;
    use serde_json::json;

    #[test]
    fn dump_prints_strings_raw_and_objects_pretty() {
        let funcs = default_funcs();
        let env = Env::new(json!({"vars": {"s": "plain", "o": {"a": 1}}}), &funcs);

        let mut buf = Vec::new();
        run_dump("vars.s", &env, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "plain\n");

        let mut buf = Vec::new();
        run_dump("vars.o", &env, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn test_hook_passes_and_fails() {
        let funcs = default_funcs();
        let env = Env::new(json!({"steps": [{"res": {"status": 500}}], "vars": {}}), &funcs);

        assert!(run_test("steps[0].res.status == 500", &env).is_ok());

        let err = run_test("steps[0].res.status == 200", &env).unwrap_err();
        match err {
            Error::Assertion { tree, .. } => {
                assert!(tree.contains("steps[0].res.status => 500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_hook_type_mismatch_is_an_expression_error() {
        let funcs = default_funcs();
        let env = Env::new(json!({"vars": {"n": 1}}), &funcs);
        let err = run_test("vars.n", &env).unwrap_err();
        assert!(matches!(err, Error::Expr(_)));
    }
}
