//! For reading and writing the DCD trajectory format. Frames are the artifacts that
//! post-processing pipelines run over, so reading is streamed: [`DcdReader`] holds one frame
//! in memory at a time.
//!
//! Layout: Fortran-style records (payload sandwiched by its length): a `CORD` header with 20
//! control ints, a title block, the atom count, then per frame, one record each for x, y and z.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use lin_alg::f32::Vec3;

const TITLE_LEN: usize = 80;

#[derive(Clone, Debug)]
pub struct DcdFrame {
    /// fs. Derived from the frame number and the header's time step.
    pub time: f64,
    /// Å
    pub atom_posits: Vec<Vec3>,
}

/// Represents a trajectory held fully in memory. For large files, iterate over a
/// [`DcdReader`] instead.
#[derive(Clone, Debug, Default)]
pub struct DcdTrajectory {
    pub frames: Vec<DcdFrame>,
}

impl DcdTrajectory {
    pub fn load(path: &Path) -> io::Result<Self> {
        let frames = DcdReader::open(path)?.collect::<io::Result<Vec<_>>>()?;
        Ok(Self { frames })
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        write_frames(path, &self.frames)
    }
}

/// Reads frames one at a time.
pub struct DcdReader<R> {
    reader: R,
    n_atoms: usize,
    n_frames: usize,
    /// fs between frames.
    delta: f64,
    next_frame: usize,
}

impl DcdReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> DcdReader<R> {
    /// Reads the header; frames are read on iteration.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let hdr = read_record(&mut reader)?;
        if hdr.len() < 84 || &hdr[0..4] != b"CORD" {
            return Err(io::Error::new(ErrorKind::InvalidData, "Not a CORD/DCD file"));
        }

        let mut icntrl = [0i32; 20];
        (&hdr[4..84]).read_i32_into::<LittleEndian>(&mut icntrl)?;

        // The time step occupies control word 10, as a float.
        let delta = (&hdr[40..44]).read_f32::<LittleEndian>()? as f64;

        // Title (ignored)
        let _ = read_record(&mut reader)?;

        let natom_block = read_record(&mut reader)?;
        if natom_block.len() != 4 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Unexpected NATOM block size",
            ));
        }
        let n_atoms = (&natom_block[..]).read_i32::<LittleEndian>()?;

        if icntrl[0] < 0 || n_atoms < 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Negative frame or atom count",
            ));
        }

        Ok(Self {
            reader,
            n_atoms: n_atoms as usize,
            n_frames: icntrl[0] as usize,
            delta,
            next_frame: 0,
        })
    }

    pub fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    /// As declared in the header.
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn read_frame(&mut self) -> io::Result<DcdFrame> {
        let xs = read_coord_block(&mut self.reader, self.n_atoms)?;
        let ys = read_coord_block(&mut self.reader, self.n_atoms)?;
        let zs = read_coord_block(&mut self.reader, self.n_atoms)?;

        let atom_posits = (0..self.n_atoms)
            .map(|k| Vec3::new(xs[k], ys[k], zs[k]))
            .collect();

        Ok(DcdFrame {
            time: self.next_frame as f64 * self.delta,
            atom_posits,
        })
    }
}

impl<R: Read> Iterator for DcdReader<R> {
    type Item = io::Result<DcdFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_frame >= self.n_frames {
            return None;
        }

        let frame = self.read_frame();
        self.next_frame = match frame {
            Ok(_) => self.next_frame + 1,
            // Don't keep reading from a stream in an unknown position.
            Err(_) => self.n_frames,
        };
        Some(frame)
    }
}

/// Write frames to a new DCD file, replacing any existing one. All frames must have the same
/// number of atoms.
pub fn write_frames(path: &Path, frames: &[DcdFrame]) -> io::Result<()> {
    let n_atoms = frames.first().map(|f| f.atom_posits.len()).unwrap_or(0);

    if frames.iter().any(|f| f.atom_posits.len() != n_atoms) {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "inconsistent atom counts",
        ));
    }

    let mut f = BufWriter::new(File::create(path)?);

    let delta = if frames.len() >= 2 {
        (frames[1].time - frames[0].time) as f32
    } else {
        0.0
    };

    let mut icntrl = [0i32; 20];
    icntrl[0] = frames.len() as i32; // NSET
    icntrl[1] = 0; // ISTART
    icntrl[2] = 1; // NSAVC
    icntrl[19] = 1;

    let mut header = Vec::with_capacity(84);
    header.extend_from_slice(b"CORD");
    for (i, v) in icntrl.iter().enumerate() {
        if i == 9 {
            header.write_f32::<LittleEndian>(delta)?;
        } else {
            header.write_i32::<LittleEndian>(*v)?;
        }
    }
    write_record(&mut f, &header)?;

    let title = format!(
        "Created by gmx_files  NATOMS={}  NFRAMES={}",
        n_atoms,
        frames.len()
    );
    let mut line = [b' '; TITLE_LEN];
    let n = title.len().min(TITLE_LEN);
    line[..n].copy_from_slice(&title.as_bytes()[..n]);

    let mut title_block = Vec::with_capacity(4 + TITLE_LEN);
    title_block.write_i32::<LittleEndian>(1)?;
    title_block.extend_from_slice(&line);
    write_record(&mut f, &title_block)?;

    let mut natom_block = Vec::with_capacity(4);
    natom_block.write_i32::<LittleEndian>(n_atoms as i32)?;
    write_record(&mut f, &natom_block)?;

    let mut xb = Vec::with_capacity(4 * n_atoms);
    let mut yb = Vec::with_capacity(4 * n_atoms);
    let mut zb = Vec::with_capacity(4 * n_atoms);

    for frame in frames {
        xb.clear();
        yb.clear();
        zb.clear();

        for p in &frame.atom_posits {
            xb.write_f32::<LittleEndian>(p.x)?;
            yb.write_f32::<LittleEndian>(p.y)?;
            zb.write_f32::<LittleEndian>(p.z)?;
        }

        write_record(&mut f, &xb)?;
        write_record(&mut f, &yb)?;
        write_record(&mut f, &zb)?;
    }

    f.flush()
}

/// A wrapper for writing a DCD record: Payload sandwiched by length.
fn write_record<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = payload.len() as u32;

    w.write_u32::<LittleEndian>(len)?;
    w.write_all(payload)?;
    w.write_u32::<LittleEndian>(len)
}

fn read_record<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;

    let len_end = r.read_u32::<LittleEndian>()? as usize;
    if len_end != len {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "record length mismatch",
        ));
    }
    Ok(payload)
}

fn read_coord_block<R: Read>(r: &mut R, n_atoms: usize) -> io::Result<Vec<f32>> {
    let b = read_record(r)?;
    if b.len() != 4 * n_atoms {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "Coordinate block size mismatch",
        ));
    }

    let mut out = vec![0f32; n_atoms];
    (&b[..]).read_f32_into::<LittleEndian>(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(time: f64, offset: f32) -> DcdFrame {
        DcdFrame {
            time,
            atom_posits: vec![
                Vec3::new(offset, 1.0, 2.0),
                Vec3::new(offset + 0.5, -1.0, 3.25),
            ],
        }
    }

    #[test]
    fn streams_written_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.dcd");

        let traj = DcdTrajectory {
            frames: vec![frame(0., 0.), frame(2., 1.), frame(4., 2.)],
        };
        traj.save(&path).unwrap();

        let mut reader = DcdReader::open(&path).unwrap();
        assert_eq!(reader.n_atoms(), 2);
        assert_eq!(reader.n_frames(), 3);

        let second = reader.nth(1).unwrap().unwrap();
        assert_eq!(second.time, 2.);
        assert_eq!(second.atom_posits[1].x, 1.5);
        assert_eq!(second.atom_posits[1].z, 3.25);

        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().is_none());

        let loaded = DcdTrajectory::load(&path).unwrap();
        assert_eq!(loaded.frames.len(), 3);
        assert_eq!(loaded.frames[2].time, 4.);
    }

    #[test]
    fn rejects_inconsistent_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut short = frame(1., 0.);
        short.atom_posits.pop();

        let err = write_frames(&dir.path().join("bad.dcd"), &[frame(0., 0.), short]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_other_files() {
        let mut bytes = Vec::new();
        write_record(&mut bytes, b"NOPE and some more header bytes").unwrap();
        assert!(DcdReader::new(&bytes[..]).is_err());
    }
}
