//! ACL and role-path SQL: statements that scope a fragment to a role and
//! search path, create a schema, and enforce a schema's owner/grants.
//! `guard_acls` introspects `pg_namespace.nspacl`, either requiring an exact
//! grant set or, in `weak` mode, only that the declared grants are present.

use crate::pg_literal::{pg_dollar_quote, pg_ident_quote, pg_quote};

/// Three `SET LOCAL` statements scoping the statements that follow to a
/// role and a single-schema search path.
pub fn pg_role_path(role: Option<&str>, schema_name: Option<&str>) -> String {
    let role_stmt = match role {
        Some(role) => format!("set local role to {};", pg_ident_quote(role)),
        None => "set local role to postgres;".to_string(),
    };

    let search_path_stmt = match schema_name {
        Some(schema) => format!("set local search_path to {};", pg_ident_quote(schema)),
        None => "set local search_path to '';".to_string(),
    };

    format!("{role_stmt}\n{search_path_stmt}\nset local check_function_bodies to off;")
}

/// Prepends the role-path preamble to `sql` and terminates it.
pub fn apply_pg_role_path(sql: &str, role: Option<&str>, schema_name: Option<&str>) -> String {
    format!("{}\n\n{}\n\n;", pg_role_path(role, schema_name), sql.trim_end())
}

pub fn create_schema(schema_name: &str, owner: &str, grants: Option<&[String]>) -> String {
    let q_schema = pg_ident_quote(schema_name);
    let q_owner = pg_ident_quote(owner);

    let mut lines = vec![
        format!("create schema {q_schema};"),
        format!("alter schema {q_schema} owner to {q_owner};"),
        format!("revoke all on schema {q_schema} from public;"),
    ];

    if let Some(grants) = grants {
        for grant in grants {
            lines.push(format!("grant usage on schema {q_schema} to {};", pg_ident_quote(grant)));
        }
    }

    lines.join("\n")
}

const GUARD_ACLS_SQL: &str = "\
declare
_create_list text[] := {q_create_list}::text[];
_usage_list text[] := {q_usage_list}::text[];
_grantor text;
_grantee text;
_privilege_type text;
_is_grantable boolean;
begin
perform 1 from pg_namespace ns
where ns.nspname = {q_schema} and ns.nspacl is null;
if found then
execute format($revoke$revoke all on schema %I from public$revoke$, {q_schema});
end if;
for _grantor, _grantee, _privilege_type, _is_grantable in
select case when acl.grantor = 0 then 'public'
else (select r.rolname from pg_roles r where oid = acl.grantor) end grantor,
case when acl.grantee = 0 then 'public'
else (select r.rolname from pg_roles r where oid = acl.grantee) end grantee,
acl.privilege_type,
acl.is_grantable
from (
select (aclexplode(ns.nspacl)).*
from pg_namespace ns
where ns.nspname = {q_schema}
) acl
loop
if _grantor = {q_owner} and _grantee = any({q_create_list}::text[])
and _privilege_type = 'CREATE' and _is_grantable = false then
_create_list := array_remove(_create_list, _grantee);
elsif _grantor = {q_owner} and _grantee = any({q_usage_list}::text[])
and _privilege_type = 'USAGE' and _is_grantable = false then
_usage_list := array_remove(_usage_list, _grantee);
{extra_branch}
else
raise 'unexpected acl: % % % % %',
quote_nullable({q_schema}), quote_nullable(_grantor), quote_nullable(_grantee),
quote_nullable(_privilege_type), quote_nullable(_is_grantable);
end if;
end loop;
if not array_length(_create_list, 1) is null then
raise 'missing create acls: % %', quote_nullable({q_schema}), quote_nullable(_create_list);
end if;
if not array_length(_usage_list, 1) is null then
raise 'missing usage acls: % %', quote_nullable({q_schema}), quote_nullable(_usage_list);
end if;
end";

fn text_array(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|x| pg_quote(Some(x))).collect();
    format!("array[{}]", quoted.join(",\n"))
}

/// Asserts the schema's ACL set equals exactly
/// `{CREATE by owner} ∪ {USAGE by owner} ∪ {USAGE by g | g ∈ grants}`.
/// When `weak` is set, any ACL entry not explained by owner/grants is
/// tolerated instead of raising (superset containment rather than
/// equality).
pub fn guard_acls(schema_name: &str, owner: &str, grants: Option<&[String]>, weak: bool) -> String {
    let create_list = vec![owner.to_string()];
    let mut usage_list = vec![owner.to_string()];
    if let Some(grants) = grants {
        usage_list.extend(grants.iter().cloned());
    }

    let q_schema = pg_quote(Some(schema_name));
    let q_owner = pg_quote(Some(owner));
    let q_create_list = text_array(&create_list);
    let q_usage_list = text_array(&usage_list);

    let extra_branch = if weak { "elsif true then\nnull;".to_string() } else { String::new() };

    let body = GUARD_ACLS_SQL
        .replace("{q_schema}", &q_schema)
        .replace("{q_owner}", &q_owner)
        .replace("{q_create_list}", &q_create_list)
        .replace("{q_usage_list}", &q_usage_list)
        .replace("{extra_branch}", &extra_branch);

    format!("do {};", pg_dollar_quote("do", Some(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_path_defaults_to_postgres_and_empty_path() {
        let sql = pg_role_path(None, None);
        assert!(sql.contains("set local role to postgres;"));
        assert!(sql.contains("set local search_path to '';"));
    }

    #[test]
    fn role_path_quotes_role_and_schema() {
        let sql = pg_role_path(Some("app_owner"), Some("core"));
        assert!(sql.contains("set local role to \"app_owner\";"));
        assert!(sql.contains("set local search_path to \"core\";"));
    }

    #[test]
    fn apply_role_path_wraps_and_terminates() {
        let sql = apply_pg_role_path("select 1", Some("r"), None);
        assert!(sql.ends_with("\n\n;"));
        assert!(sql.contains("select 1"));
    }

    #[test]
    fn create_schema_includes_one_grant_per_grantee() {
        let sql = create_schema("core", "app_owner", Some(&["reader".to_string(), "writer".to_string()]));
        assert!(sql.contains("grant usage on schema \"core\" to \"reader\";"));
        assert!(sql.contains("grant usage on schema \"core\" to \"writer\";"));
    }

    #[test]
    fn create_schema_without_grants_has_no_grant_statements() {
        let sql = create_schema("core", "app_owner", None);
        assert!(!sql.contains("grant usage"));
    }

    #[test]
    fn guard_acls_strict_has_no_fallthrough_branch() {
        let sql = guard_acls("core", "app_owner", None, false);
        assert!(!sql.contains("elsif true"));
    }

    #[test]
    fn guard_acls_weak_adds_fallthrough_branch() {
        let sql = guard_acls("core", "app_owner", None, true);
        assert!(sql.contains("elsif true then\nnull;"));
    }
}
