use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Read every line of the input_file into memory
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_lines(input_file_path: &str) -> anyhow::Result<Vec<Box<str>>> {
    let buf: Box<dyn BufRead> = open_buf_reader(input_file_path)?;
    let mut lines = vec![];
    for x in buf.lines() {
        lines.push(x?.into_boxed_str());
    }
    Ok(lines)
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines(lines: &[Box<str>], output_file_path: &str) -> anyhow::Result<()> {
    write_types(lines, output_file_path)
}

///
/// Write every displayable item as a line into the output_file
///
/// * `lines` - vector of items
/// * `output_file` - file name--either gzipped or not
///
pub fn write_types<T>(lines: &[T], output_file_path: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let res = with_buf_writer(output_file_path, |buf| {
        for line in lines {
            writeln!(buf, "{}", line)?;
        }
        Ok(())
    });
    match res {
        Err(e)
            if e.downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::BrokenPipe) =>
        {
            Ok(())
        }
        res => res,
    }
}

///
/// Read lines and split each of them into whitespace-separated
/// words. Empty lines and comment lines (`#` or `%`) are skipped,
/// and the order of lines is preserved.
///
/// * `input_file` - file name--either gzipped or not
///
pub fn read_lines_of_words(input_file: &str) -> anyhow::Result<Vec<Vec<Box<str>>>> {
    let buf_reader: Box<dyn BufRead> = open_buf_reader(input_file)?;

    fn is_data_line(line: &str) -> bool {
        !(line.trim().is_empty() || line.starts_with('#') || line.starts_with('%'))
    }

    let lines_raw: Vec<Box<str>> = buf_reader
        .lines()
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .filter(|x| is_data_line(x))
        .map(|x| x.into_boxed_str())
        .collect();

    // Parsing takes more time, so split them into parallel jobs
    let mut lines: Vec<(usize, Vec<Box<str>>)> = lines_raw
        .par_iter()
        .enumerate()
        .map(|(i, s)| {
            (
                i,
                s.split_whitespace()
                    .map(|x| x.to_owned().into_boxed_str())
                    .collect(),
            )
        })
        .collect();

    lines.sort_by_key(|&(i, _)| i);
    Ok(lines.into_iter().map(|(_, x)| x).collect())
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    match ext {
        Some("gz") => {
            let input_file = File::open(input_file)?;
            let decoder = GzDecoder::new(input_file);
            Ok(Box::new(BufReader::new(decoder)))
        }
        _ => {
            let input_file = File::open(input_file)?;
            Ok(Box::new(BufReader::new(input_file)))
        }
    }
}

///
/// Open a file for writing and hand a buffered writer to `write`.
/// The buffer is flushed and a gzip stream finished before
/// returning, so errors that `Drop` would swallow come back here.
///
/// * `output_file` - file name--either gzipped or not
/// * `write` - fills the writer
///
pub fn with_buf_writer<F>(output_file: &str, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut dyn Write) -> anyhow::Result<()>,
{
    // we can simply override with stdout
    if output_file.eq_ignore_ascii_case("stdout") {
        let mut buf = BufWriter::new(std::io::stdout());
        write(&mut buf)?;
        buf.flush()?;
        return Ok(());
    }

    if output_file.eq_ignore_ascii_case("stderr") {
        let mut buf = BufWriter::new(std::io::stderr());
        write(&mut buf)?;
        buf.flush()?;
        return Ok(());
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    match ext {
        Some("gz") => {
            let output_file = File::create(output_file)?;
            let encoder = GzEncoder::new(output_file, flate2::Compression::default());
            let mut buf = BufWriter::new(encoder);
            write(&mut buf)?;
            let encoder = buf.into_inner().map_err(|e| e.into_error())?;
            encoder.finish()?;
        }
        _ => {
            let output_file = File::create(output_file)?;
            let mut buf = BufWriter::new(output_file);
            write(&mut buf)?;
            buf.into_inner().map_err(|e| e.into_error())?;
        }
    }
    Ok(())
}

///
/// Create a directory if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    let dir = path.parent().ok_or(anyhow::anyhow!("no parent"))?;
    std::fs::create_dir_all(dir)?;
    Ok(())
}
