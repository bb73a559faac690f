//! `qrd seed`: load a menu fixture into Postgres.

use anyhow::{bail, Context, Result};
use qrd_schemas::MenuFixture;

pub async fn seed(fixture_path: &str) -> Result<()> {
    let fixture = read_fixture(fixture_path)?;

    let pool = qrd_db::connect_from_env().await?;
    let st = qrd_db::status(&pool).await?;
    if !st.has_orders_table {
        bail!("database has no orders table; run `qrd db migrate` first");
    }

    let counts = qrd_db::seed_fixture(&pool, &fixture).await?;
    println!(
        "seeded=true accounts={} tables={} products={}",
        counts.accounts, counts.tables, counts.products
    );
    Ok(())
}

/// Parse a fixture and reject rows that point at accounts it does not define.
pub fn read_fixture(path: &str) -> Result<MenuFixture> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read fixture: {path}"))?;
    let fixture: MenuFixture =
        serde_yaml::from_str(&raw).with_context(|| format!("invalid fixture yaml: {path}"))?;

    let known = |account_id: &str| fixture.accounts.iter().any(|a| a.account_id == account_id);
    for t in &fixture.tables {
        if !known(&t.account_id) {
            bail!("fixture table {} references unknown account {}", t.table_id, t.account_id);
        }
    }
    for p in &fixture.products {
        if !known(&p.account_id) {
            bail!("fixture product {} references unknown account {}", p.product_id, p.account_id);
        }
        if p.price_cents < 0 {
            bail!("fixture product {} has a negative price", p.product_id);
        }
    }
    Ok(fixture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(yaml: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn fixture_with_known_accounts_parses() {
        let f = write_tmp(
            r#"
accounts:
  - { account_id: bistro, name: Bistro }
tables:
  - { account_id: bistro, table_id: t1, label: "Table 1" }
products:
  - { account_id: bistro, product_id: soup, name: Soup, price_cents: 650 }
"#,
        );
        let fx = read_fixture(f.path().to_str().unwrap()).unwrap();
        assert_eq!(fx.accounts.len(), 1);
        assert!(fx.accounts[0].ordering_enabled);
        assert_eq!(fx.products[0].price_cents, 650);
    }

    #[test]
    fn dangling_account_reference_is_rejected() {
        let f = write_tmp(
            r#"
accounts: []
tables:
  - { account_id: ghost, table_id: t1, label: "Table 1" }
"#,
        );
        let err = read_fixture(f.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown account ghost"));
    }
}
