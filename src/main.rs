use csv_core::{ReadFieldResult, ReaderBuilder};
use lasso::{Key, Rodeo, Spur};
use relattice::*;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::io;
use std::str;

/// Columnar observations: variable names from the header row, value labels
/// interned per column in first-seen order, and one (labels, frequency) entry per
/// data row.
struct RawData {
    names: Vec<(String, bool)>,
    columns: Vec<Rodeo<Spur>>,
    rows: Vec<(Vec<Spur>, f64)>,
}

fn bad_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Reads tab-separated observations. The header row names one variable per
/// column, with a trailing `*` marking a dependent variable; every other row
/// holds one value label per variable, optionally preceded by a frequency.
fn load_data<I: io::Read>(mut input: I) -> io::Result<RawData> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 1024];
    let mut fieldlen = 0;
    let mut record = Vec::new();
    let mut data = RawData {
        names: Vec::new(),
        columns: Vec::new(),
        rows: Vec::new(),
    };
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').build();

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = tsv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    return Err(bad_data(format!("field too long on line {}", tsv.line())));
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen])
                        .map_err(|e| bad_data(e.to_string()))?;
                    record.push(field.to_owned());
                    fieldlen = 0;
                    if record_end {
                        take_record(&mut data, &mut record, tsv.line())?;
                    }
                }
                ReadFieldResult::End => {
                    if !record.is_empty() {
                        take_record(&mut data, &mut record, tsv.line())?;
                    }
                    return Ok(data);
                }
            }
        }
    }
}

fn take_record(data: &mut RawData, record: &mut Vec<String>, line: u64) -> io::Result<()> {
    if data.names.is_empty() {
        for name in record.drain(..) {
            let dependent = name.ends_with('*');
            let name = name.trim_end_matches('*').to_owned();
            if name.is_empty() {
                return Err(bad_data(format!("empty variable name on line {}", line)));
            }
            data.names.push((name, dependent));
            data.columns.push(Rodeo::new());
        }
        return Ok(());
    }

    // a row one field longer than the header carries its frequency up front
    let mut fields = record.drain(..);
    let count = if fields.len() == data.names.len() + 1 {
        let field = match fields.next() {
            Some(field) => field,
            None => return Ok(()),
        };
        field
            .parse()
            .map_err(|_| bad_data(format!("bad frequency {:?} on line {}", field, line)))?
    } else if fields.len() == data.names.len() {
        1.0
    } else {
        return Err(bad_data(format!(
            "expected {} fields on line {}, got {}",
            data.names.len(),
            line,
            fields.len()
        )));
    };

    let labels: Vec<Spur> = fields
        .zip(data.columns.iter_mut())
        .map(|(label, column)| column.get_or_intern(label))
        .collect();
    if count > 0.0 {
        data.rows.push((labels, count));
    }
    Ok(())
}

fn main() -> io::Result<()> {
    env_logger::init();

    let raw = load_data(io::stdin().lock())?;
    if raw.names.is_empty() {
        return Err(bad_data("no header row".to_owned()));
    }
    let mut builder = CatalogBuilder::new();
    for (at, (name, dependent)) in raw.names.iter().enumerate() {
        builder.add_variable(name, name, raw.columns[at].len(), *dependent);
    }
    let catalog = builder.build();

    let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
    for (labels, count) in &raw.rows {
        let values: Vec<usize> = labels.iter().map(|&label| label.into_usize()).collect();
        table.sum_tuple(&build_full_key(&catalog, &values), *count);
    }

    let mut manager = Manager::new(catalog, table);
    println!("sample size: {}", manager.sample_size());
    println!("input entropy: {:.5} bits", manager.input_entropy());

    let strategy_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "full-down".to_owned());
    let search = strategy(&strategy_name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown search strategy {:?}", strategy_name),
        )
    })?;
    let width: usize = match std::env::args().nth(2) {
        Some(arg) => arg
            .parse()
            .map_err(|_| bad_data(format!("bad search width {:?}", arg)))?,
        None => 3,
    };

    let start = if strategy_name.ends_with("up") {
        manager.bottom_model()
    } else {
        manager.top_model()
    };
    report(&mut manager, start);

    let mut seen: HashSet<ModelId> = HashSet::new();
    seen.insert(start);
    let mut current = vec![start];
    let mut level = 0;
    loop {
        level += 1;
        let mut next: Vec<ModelId> = Vec::new();
        for &model in &current {
            for candidate in search.search(&mut manager, model) {
                if seen.insert(candidate) {
                    next.push(candidate);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        for &model in &next {
            manager.compute_transmission(model);
        }
        next.sort_by(|&a, &b| {
            let ta = manager.model(a).attributes().get(attribute::T);
            let tb = manager.model(b).attributes().get(attribute::T);
            ta.partial_cmp(&tb).unwrap_or(Ordering::Equal)
        });
        next.truncate(width);
        println!();
        println!("level {}:", level);
        for &model in &next {
            report(&mut manager, model);
        }
        current = next;
    }
    Ok(())
}

fn report(manager: &mut Manager, model: ModelId) {
    let df = manager.compute_df(model);
    let h = manager.compute_h(model);
    let t = manager.compute_transmission(model);
    let name = manager
        .model(model)
        .name(manager.catalog(), manager.relation_cache())
        .to_owned();
    println!("  {}: df {}, h {:.5} bits, t {:.5} bits", name, df, h, t);
}
