//! Prints the local and tile coordinates of every work-item in a small 2D grid.

use tilegrid::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let acc = Accelerator::new(AcceleratorConfig::default())?;
    let tiled = Extent::new([4, 6])?.tile([2, 3])?;
    let probe = probe_tile_ids(&acc, tiled)?;

    let [rows, cols] = tiled.extent().dims();
    for row in 0..rows {
        let line: Vec<String> = (0..cols)
            .map(|col| {
                let g = row * cols + col;
                let [tr, tc] = probe.tile[g];
                let [lr, lc] = probe.local[g];
                format!("t({tr},{tc}) l({lr},{lc})")
            })
            .collect();
        println!("{}", line.join("  "));
    }
    Ok(())
}
