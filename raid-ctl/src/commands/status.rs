// vim: tw=80
//! `raid-ctl status`: open an array read-only and print its health.

use std::path::Path;

use raid_core::Result;
use si_scale::helpers::bibytes2;
use tabular::{Row, Table};

use super::open;

pub fn run(config_path: &Path) -> Result<String> {
    let (name, array) = open(config_path)?;

    let mut table = Table::new("{:<}  {:<}");
    table.add_row(Row::new().with_cell("array").with_cell(&name));
    table.add_row(Row::new().with_cell("kind").with_cell(array.kind_name()));
    table.add_row(Row::new().with_cell("children").with_cell(array.child_ids()));
    table.add_row(Row::new().with_cell("degraded state").with_cell(array.degraded_state_string()));
    table.add_row(Row::new().with_cell("dirty pages").with_cell(array.dirty_pages_string()));
    table.add_row(Row::new().with_cell("capacity").with_cell(bibytes2(array.capacity() as f64)));
    table.add_row(Row::new().with_cell("logical block size").with_cell(array.logical_block_size()));
    let rendered = table.to_string();

    array.close()?;
    Ok(rendered)
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn reports_health_of_a_freshly_created_array() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("array.toml");
        std::fs::write(
            &config_path,
            format!(
                "[array]\nkind = \"raid1\"\n\n[[array.children]]\npath = \"{}\"\n\n[[array.children]]\npath = \"{}\"\n",
                dir.path().join("a.img").display(),
                dir.path().join("b.img").display(),
            ),
        )
        .unwrap();
        crate::commands::create::run(&config_path, 2 * 1024 * 1024).unwrap();

        let rendered = run(&config_path).unwrap();
        assert!(rendered.contains("raid1"));
        assert!(rendered.contains("Healthy"));
    }
}
