pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, info, section, success, summary_row, timestamp, warn};
pub use table::{
    forward_stats_table, forwards_table, queries_table, stats_table, templates_table, TableBuilder,
};
pub use theme::{theme, Theme};
