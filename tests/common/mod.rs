#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Two-scale tiny template: geometry, two output layers and their filters.
pub const TINY_TEMPLATE: &str = "\
[net]
batch=1
subdivisions=1
width=416
height=416
channels=3

[convolutional]
size=3
filters=32
activation=leaky

[convolutional]
size=1
filters=255
activation=linear

[yolo]
mask = 3,4,5
anchors = 10,14,  23,27,  37,58,  81,82,  135,169,  344,319
classes=80
num=6

[route]
layers = -4

[convolutional]
size=1
filters=255
activation=linear

[yolo]
mask = 1,2,3
anchors = 10,14,  23,27,  37,58,  81,82,  135,169,  344,319
classes=80
num=6
";

pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, 0);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bmp_bytes(width, height)).expect("write bmp file");
}

/// Writes an image and its label file. An empty `lines` gives a negative.
pub fn write_labeled_image(path: &Path, width: u32, height: u32, lines: &[&str]) {
    write_bmp(path, width, height);
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    fs::write(path.with_extension("txt"), text).expect("write label file");
}

pub fn write_names(path: &Path, names: &[&str]) {
    fs::write(path, format!("{}\n", names.join("\n"))).expect("write names file");
}

/// Paths of a generated project: image tree, names, template, output dir.
pub struct Project {
    pub images: PathBuf,
    pub names: PathBuf,
    pub template: PathBuf,
    pub output: PathBuf,
}

/// `annotated` images with one box each (alternating two classes) and
/// `negatives` images with empty label files, all `width` x `height`.
pub fn create_project(root: &Path, annotated: usize, negatives: usize, width: u32, height: u32) -> Project {
    let images = root.join("images");
    fs::create_dir_all(&images).expect("create images dir");

    for i in 0..annotated {
        let size = 0.2 + 0.05 * (i % 5) as f64;
        let line = format!("{} 0.5 0.5 {:.6} {:.6}", i % 2, size, size * 0.8);
        write_labeled_image(&images.join(format!("img_{i:03}.bmp")), width, height, &[&line]);
    }
    for i in 0..negatives {
        write_labeled_image(&images.join(format!("neg_{i:03}.bmp")), width, height, &[]);
    }

    let names = root.join("animals.names");
    write_names(&names, &["cat", "dog"]);
    let template = root.join("yolov4-tiny.cfg");
    fs::write(&template, TINY_TEMPLATE).expect("write template");

    Project {
        images,
        names,
        template,
        output: root.join("out"),
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read file")
        .lines()
        .map(str::to_string)
        .collect()
}
