//! データセットアーカイブの読み書き
//!
//! アーカイブはtar形式（gzip圧縮も可）で、各メンバーが `<key>.npy` の配列です。
//!
//! - 学習用: `data.npy` (N, H, W, 3) と `target.npy` (N, 15)
//! - テスト用: `data.npy` (M, H, W, 3) と `name.npy` (M,)
//!
//! Pythonからは `np.save` した配列を `tarfile` でまとめれば作成できます。

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::dataset::npy::{self, NpyArray};
use crate::dataset::{ImageSet, TestDataset, TrainDataset};
use crate::error::{Error, Result};
use crate::types::{ImageShape, NUM_CLASSES};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// アーカイブ内の配列（キー → 配列）
struct ArchiveContents {
    path: String,
    arrays: HashMap<String, NpyArray>,
}

impl ArchiveContents {
    fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let arrays = if bytes.starts_with(&GZIP_MAGIC) {
            read_members(Archive::new(GzDecoder::new(bytes.as_slice())))?
        } else {
            read_members(Archive::new(bytes.as_slice()))?
        };

        Ok(Self {
            path: path.display().to_string(),
            arrays,
        })
    }

    fn take(&mut self, key: &str) -> Result<NpyArray> {
        self.arrays.remove(key).ok_or_else(|| Error::MissingKey {
            path: self.path.clone(),
            key: key.to_string(),
        })
    }
}

fn read_members<R: Read>(mut archive: Archive<R>) -> Result<HashMap<String, NpyArray>> {
    let mut arrays = HashMap::new();

    for entry in archive
        .entries()
        .map_err(|e| Error::Archive(format!("not a tar archive: {}", e)))?
    {
        let mut entry = entry.map_err(|e| Error::Archive(format!("bad tar entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        if path.extension().and_then(|s| s.to_str()) != Some("npy") {
            continue;
        }
        let key = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer)?;
        let array = npy::read_npy(&buffer)
            .map_err(|e| Error::Archive(format!("member {}: {}", path.display(), e)))?;
        arrays.insert(key, array);
    }

    Ok(arrays)
}

/// `data` 配列を画像集合に変換
fn image_set(array: NpyArray) -> Result<ImageSet> {
    let shape = match array.shape.as_slice() {
        [_, height, width, channels] => ImageShape::new(*height, *width, *channels),
        other => {
            return Err(Error::Shape(format!(
                "`data` must be (N, H, W, 3), found {:?}",
                other
            )))
        }
    };
    ImageSet::new(shape, array.into_floats()?)
}

/// 学習用アーカイブを読み込む
pub fn load_train_dataset(path: &Path) -> Result<TrainDataset> {
    let mut contents = ArchiveContents::open(path)?;
    let images = image_set(contents.take("data")?)?;

    let target = contents.take("target")?;
    match target.shape.as_slice() {
        [rows, NUM_CLASSES] if *rows == images.len() => {}
        other => {
            return Err(Error::Shape(format!(
                "`target` must be ({}, {}), found {:?}",
                images.len(),
                NUM_CLASSES,
                other
            )))
        }
    }

    TrainDataset::new(images, target.into_floats()?)
}

/// テスト用アーカイブを読み込む
pub fn load_test_dataset(path: &Path) -> Result<TestDataset> {
    let mut contents = ArchiveContents::open(path)?;
    let images = image_set(contents.take("data")?)?;

    let name = contents.take("name")?;
    if name.shape.len() != 1 {
        return Err(Error::Shape(format!(
            "`name` must be one-dimensional, found {:?}",
            name.shape
        )));
    }

    TestDataset::new(images, name.into_strings()?)
}

fn append_member<W: Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

fn write_members(path: &Path, members: &[(&str, Vec<u8>)], compress: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;

    if compress {
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, bytes) in members {
            append_member(&mut builder, name, bytes)?;
        }
        builder.into_inner()?.finish()?;
    } else {
        let mut builder = Builder::new(file);
        for (name, bytes) in members {
            append_member(&mut builder, name, bytes)?;
        }
        builder.finish()?;
    }
    Ok(())
}

fn data_member(images: &ImageSet) -> Result<Vec<u8>> {
    let shape = images.shape();
    npy::write_npy_f32(
        &[images.len(), shape.height, shape.width, shape.channels],
        images.pixels(),
    )
}

/// 学習用データセットをアーカイブに書き出す
pub fn write_train_archive(path: &Path, dataset: &TrainDataset, compress: bool) -> Result<()> {
    let members = [
        ("data.npy", data_member(dataset.images())?),
        (
            "target.npy",
            npy::write_npy_f32(&[dataset.len(), NUM_CLASSES], dataset.targets())?,
        ),
    ];
    write_members(path, &members, compress)
}

/// テスト用データセットをアーカイブに書き出す
pub fn write_test_archive(path: &Path, dataset: &TestDataset, compress: bool) -> Result<()> {
    let members = [
        ("data.npy", data_member(dataset.images())?),
        ("name.npy", npy::write_npy_strings(dataset.names())),
    ];
    write_members(path, &members, compress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("action_recognition_archive_{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_train_archive_loads_back() {
        let path = temp_path("train.tar.gz");
        let dataset = fixtures::train_dataset(4, 3, 5);
        write_train_archive(&path, &dataset, true).unwrap();

        let loaded = load_train_dataset(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.shape(), ImageShape::new(3, 5, 3));
        assert_eq!(loaded.class_index(3), 3);
        assert_eq!(loaded.images().image(2)[0], 2.0);
    }

    #[test]
    fn test_test_archive_keeps_names() {
        let path = temp_path("test.tar");
        let dataset = fixtures::test_dataset(&["a_3.png", "a_1.png"], 2, 2);
        write_test_archive(&path, &dataset, false).unwrap();

        let loaded = load_test_dataset(&path).unwrap();
        assert_eq!(loaded.names(), dataset.names());
        assert_eq!(loaded.images().pixels(), dataset.images().pixels());
    }

    #[test]
    fn test_missing_target_is_fatal() {
        // テスト用アーカイブを学習用として読むと `target` が無い
        let path = temp_path("names_only.tar");
        let dataset = fixtures::test_dataset(&["a_1.png"], 2, 2);
        write_test_archive(&path, &dataset, false).unwrap();

        let err = load_train_dataset(&path).unwrap_err();
        assert!(matches!(err, Error::MissingKey { ref key, .. } if key == "target"));
    }

    #[test]
    fn test_target_row_mismatch_is_fatal() {
        let path = temp_path("mismatch.tar");
        let images = fixtures::train_dataset(3, 2, 2);
        let members = [
            ("data.npy", data_member(images.images()).unwrap()),
            (
                "target.npy",
                npy::write_npy_f32(&[2, NUM_CLASSES], &images.targets()[..2 * NUM_CLASSES]).unwrap(),
            ),
        ];
        write_members(&path, &members, false).unwrap();

        assert!(matches!(load_train_dataset(&path), Err(Error::Shape(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_test_dataset(&temp_path("does_not_exist.tar")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_garbage_is_not_an_archive() {
        let path = temp_path("garbage.tar");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"this is not a tar archive at all").unwrap();
        assert!(load_test_dataset(&path).is_err());
    }
}
