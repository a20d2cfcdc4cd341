use std::path::Path;

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use aspire_annotate::ReconcileReport;
use aspire_pipeline::{BuildPlan, BuildReport, Disposition};

pub fn print_build_summary(report: &BuildReport) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Stage"),
        header_cell("Action"),
        header_cell("Suffix"),
        header_cell("Output"),
        header_cell("Rewrites"),
        header_cell("Tool runs"),
        header_cell("Time (ms)"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 4, CellAlignment::Right);
    align_column(&mut table, 5, CellAlignment::Right);
    align_column(&mut table, 6, CellAlignment::Right);
    let mut total_rewrites = 0usize;
    let mut total_runs = 0usize;
    for stage in &report.stages {
        let rewrites = stage.reconcile.as_ref().map(ReconcileReport::rewrites);
        total_rewrites += rewrites.unwrap_or(0);
        total_runs += stage.work_items;
        table.add_row(vec![
            stage_cell(&stage.name),
            disposition_cell(stage.disposition),
            suffix_cell(&stage.suffix),
            folder_cell(&stage.output_dir),
            count_cell(rewrites),
            count_cell(Some(stage.work_items)),
            Cell::new(stage.duration_ms),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(format!(
            "{} run, {} reused",
            report.count(Disposition::Execute),
            report.count(Disposition::Reuse)
        ))
        .fg(Color::Cyan),
        dim_cell("-"),
        dim_cell("-"),
        count_cell(Some(total_rewrites)).add_attribute(Attribute::Bold),
        count_cell(Some(total_runs)).add_attribute(Attribute::Bold),
        dim_cell("-"),
    ]);
    println!("{table}");
}

pub fn print_plan(plan: &BuildPlan) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Stage"),
        header_cell("Action"),
        header_cell("Suffix"),
        header_cell("Reads"),
        header_cell("Annotates"),
        header_cell("Writes"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 4, CellAlignment::Center);
    for stage in &plan.stages {
        let outputs = stage
            .outputs
            .iter()
            .map(|output| folder_name(&output.actual))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            stage_cell(&stage.name),
            disposition_cell(stage.disposition),
            suffix_cell(&stage.suffix),
            folder_cell(&stage.working_dir),
            if stage.annotate {
                Cell::new("✓").fg(Color::Green).add_attribute(Attribute::Bold)
            } else {
                dim_cell("-")
            },
            if outputs.is_empty() {
                dim_cell("-")
            } else {
                Cell::new(outputs)
            },
        ]);
    }
    println!("{table}");
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(140);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn stage_cell(name: &str) -> Cell {
    Cell::new(name)
        .fg(Color::Blue)
        .add_attribute(Attribute::Bold)
}

fn disposition_cell(disposition: Disposition) -> Cell {
    let cell = Cell::new(disposition);
    match disposition {
        Disposition::Execute => cell.fg(Color::Yellow),
        Disposition::Reuse => cell.fg(Color::Green),
        Disposition::Traverse => cell,
        Disposition::Skip => cell.fg(Color::DarkGrey),
    }
}

fn suffix_cell(suffix: &str) -> Cell {
    if suffix.is_empty() {
        dim_cell("-")
    } else {
        Cell::new(suffix.trim_start_matches('-'))
    }
}

fn folder_cell(path: &Path) -> Cell {
    if path.as_os_str().is_empty() {
        dim_cell("-")
    } else {
        Cell::new(folder_name(path))
    }
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn count_cell(count: Option<usize>) -> Cell {
    match count {
        Some(value) if value > 0 => Cell::new(value).add_attribute(Attribute::Bold),
        Some(value) => dim_cell(value),
        None => dim_cell("-"),
    }
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
