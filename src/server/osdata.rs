//! XML views served through `qXfer:osdata:read`: the process list, and the
//! per-core load and link-traffic tables. Load and traffic values are
//! placeholders; only the shape of the documents is meaningful.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::codec;
use crate::target::TargetControl;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Annex {
    Process,
    Load,
    Traffic,
}

impl Annex {
    fn parse(name: &[u8]) -> Option<Annex> {
        match name {
            b"process" => Some(Annex::Process),
            b"load" => Some(Annex::Load),
            b"traffic" => Some(Annex::Traffic),
            _ => None,
        }
    }
}

/// Cached renderings of the OS-data views. A view is rendered afresh for
/// every offset-0 request and then served in windows.
pub struct OsData {
    cache: HashMap<Annex, String>,
    rng: StdRng,
}

impl OsData {
    pub fn new() -> OsData {
        OsData {
            cache: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Produce the `m`/`l` reply body for one window of an annex, or `None`
    /// for an unknown annex.
    pub fn window<T: TargetControl>(
        &mut self,
        annex: &[u8],
        offset: usize,
        length: usize,
        target: &mut T,
    ) -> Option<Vec<u8>> {
        let annex = Annex::parse(annex)?;
        if offset == 0 || !self.cache.contains_key(&annex) {
            let doc = self.render(annex, target);
            self.cache.insert(annex, doc);
        }
        let doc = self.cache[&annex].as_bytes();

        let mut body;
        if offset >= doc.len() {
            body = vec![b'l'];
        } else if offset + length >= doc.len() {
            body = vec![b'l'];
            body.extend_from_slice(&codec::rsp_escape(&doc[offset..]));
        } else {
            body = vec![b'm'];
            body.extend_from_slice(&codec::rsp_escape(&doc[offset..offset + length]));
        }
        Some(body)
    }

    fn render<T: TargetControl>(&mut self, annex: Annex, target: &mut T) -> String {
        match annex {
            Annex::Process => render_process(target),
            Annex::Load => self.render_load(target),
            Annex::Traffic => self.render_traffic(target),
        }
    }

    fn render_load<T: TargetControl>(&mut self, target: &mut T) -> String {
        let mut doc = doc_header("load");
        for id in target.list_core_ids() {
            doc.push_str("<item>\n");
            doc.push_str(&column("coreid", &format!("0x{:03x}", id)));
            doc.push_str(&column("load", &self.rng.gen_range(0..100u32).to_string()));
            doc.push_str("</item>\n");
        }
        doc.push_str("</osdata>\n");
        doc
    }

    fn render_traffic<T: TargetControl>(&mut self, target: &mut T) -> String {
        let rows = target.rows();
        let cols = target.cols();
        let mut doc = doc_header("traffic");
        for (core, id) in target.list_core_ids().into_iter().enumerate() {
            let row = core as u32 / cols;
            let col = core as u32 % cols;
            let mut dir = |edge: bool| {
                if edge {
                    "--".to_string()
                } else {
                    self.rng.gen_range(0..100u32).to_string()
                }
            };
            let north = dir(row == 0);
            let south = dir(row + 1 == rows);
            let east = dir(col + 1 == cols);
            let west = dir(col == 0);

            doc.push_str("<item>\n");
            doc.push_str(&column("coreid", &format!("0x{:03x}", id)));
            doc.push_str(&column("north", &north));
            doc.push_str(&column("south", &south));
            doc.push_str(&column("east", &east));
            doc.push_str(&column("west", &west));
            doc.push_str(&column("in", &self.rng.gen_range(0..100u32).to_string()));
            doc.push_str(&column("out", &self.rng.gen_range(0..100u32).to_string()));
            doc.push_str("</item>\n");
        }
        doc.push_str("</osdata>\n");
        doc
    }
}

impl Default for OsData {
    fn default() -> OsData {
        OsData::new()
    }
}

fn render_process<T: TargetControl>(target: &mut T) -> String {
    let cores = target
        .list_core_ids()
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut doc = doc_header("processes");
    doc.push_str("<item>\n");
    doc.push_str(&column("pid", "1"));
    doc.push_str(&column("command", "mesh-app"));
    doc.push_str(&column("cores", &cores));
    doc.push_str("</item>\n");
    doc.push_str("</osdata>\n");
    doc
}

fn doc_header(kind: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n\
         <!DOCTYPE target SYSTEM \"osdata.dtd\">\n\
         <osdata type=\"{}\">\n",
        kind
    )
}

fn column(name: &str, value: &str) -> String {
    format!("<column name=\"{}\">{}</column>\n", name, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::sim::SimMesh;

    #[test]
    fn process_lists_a_single_pid_with_all_cores() {
        let mut sim = SimMesh::new(2, 2);
        let mut osdata = OsData::new();
        let body = osdata.window(b"process", 0, 4096, &mut sim).unwrap();
        assert_eq!(body[0], b'l');
        let doc = String::from_utf8(body[1..].to_vec()).unwrap();
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("<osdata type=\"processes\">"));
        assert!(doc.contains("<column name=\"pid\">1</column>"));
        // 2x2 mesh: ids 0, 1, 64, 65 (row in bits [9:6]).
        assert!(doc.contains("<column name=\"cores\">0,1,64,65</column>"));
    }

    #[test]
    fn load_has_one_row_per_core() {
        let mut sim = SimMesh::new(2, 2);
        let mut osdata = OsData::new();
        let body = osdata.window(b"load", 0, 4096, &mut sim).unwrap();
        let doc = String::from_utf8(body[1..].to_vec()).unwrap();
        assert_eq!(doc.matches("<item>").count(), 4);
        assert_eq!(doc.matches("</item>").count(), 4);
        assert!(doc.ends_with("</osdata>\n"));
    }

    #[test]
    fn traffic_marks_mesh_edges() {
        let mut sim = SimMesh::new(1, 2);
        let mut osdata = OsData::new();
        let body = osdata.window(b"traffic", 0, 8192, &mut sim).unwrap();
        let doc = String::from_utf8(body[1..].to_vec()).unwrap();
        // A 1x2 mesh: every core sits on the north and south edge.
        assert_eq!(doc.matches("<column name=\"north\">--</column>").count(), 2);
        assert_eq!(doc.matches("<column name=\"south\">--</column>").count(), 2);
        // West edge only for core 0, east edge only for core 1.
        assert_eq!(doc.matches("<column name=\"west\">--</column>").count(), 1);
        assert_eq!(doc.matches("<column name=\"east\">--</column>").count(), 1);
    }

    #[test]
    fn windows_reassemble_the_document() {
        let mut sim = SimMesh::new(2, 2);
        let mut osdata = OsData::new();

        let mut assembled = Vec::new();
        let mut offset = 0;
        loop {
            let body = osdata.window(b"process", offset, 16, &mut sim).unwrap();
            let marker = body[0];
            // The chunks of a fixed document contain no escapable bytes.
            assembled.extend_from_slice(&body[1..]);
            if marker == b'l' {
                break;
            }
            offset += body.len() - 1;
        }

        let whole = osdata.window(b"process", 0, 1 << 16, &mut sim).unwrap();
        assert_eq!(assembled, whole[1..].to_vec());
    }

    #[test]
    fn unknown_annex_is_refused() {
        let mut sim = SimMesh::new(2, 2);
        let mut osdata = OsData::new();
        assert!(osdata.window(b"threads", 0, 64, &mut sim).is_none());
    }
}
