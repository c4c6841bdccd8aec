use crate::spec::kind::SUBMIT_BUTTONS_BLOCK;
use crate::spec::page::{Block, BlockPosition, Page, Section};

/// A block together with where it sits in the layout.
#[derive(Debug, Clone, Copy)]
pub struct PlacedBlock<'a> {
    pub section_index: usize,
    pub region: &'a str,
    pub weight: i64,
    pub position: BlockPosition,
    pub block: &'a Block,
}

impl<'a> PlacedBlock<'a> {
    pub fn kind(&self) -> &'a str {
        &self.block.kind
    }
}

/// Read-only view over a page layout that yields its blocks in order:
/// section, then region in order of first appearance, then ascending weight.
///
/// Submit button blocks are skipped. Each call to [`LayoutWalker::blocks`]
/// starts a fresh pass.
#[derive(Debug, Clone, Copy)]
pub struct LayoutWalker<'a> {
    sections: &'a [Section],
}

impl<'a> LayoutWalker<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self {
            sections: &page.sections,
        }
    }

    pub fn blocks(&self) -> Blocks<'a> {
        Blocks {
            sections: self.sections,
            next_section: 0,
            pending: Vec::new().into_iter(),
        }
    }

    /// Positions of every data block, in walk order.
    pub fn positions(&self) -> Vec<BlockPosition> {
        self.blocks().map(|placed| placed.position).collect()
    }
}

/// Iterator returned by [`LayoutWalker::blocks`]; orders one section at a
/// time as it is reached.
#[derive(Debug)]
pub struct Blocks<'a> {
    sections: &'a [Section],
    next_section: usize,
    pending: std::vec::IntoIter<PlacedBlock<'a>>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = PlacedBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(placed) = self.pending.next() {
                return Some(placed);
            }
            let section = self.sections.get(self.next_section)?;
            self.pending = order_section(self.next_section, section).into_iter();
            self.next_section += 1;
        }
    }
}

fn order_section(section_index: usize, section: &Section) -> Vec<PlacedBlock<'_>> {
    let data_blocks = || {
        section
            .components
            .iter()
            .enumerate()
            .filter(|(_, block)| block.kind != SUBMIT_BUTTONS_BLOCK)
    };
    let mut regions: Vec<&str> = Vec::new();
    for (_, block) in data_blocks() {
        if !regions.contains(&block.region.as_str()) {
            regions.push(&block.region);
        }
    }

    let mut ordered = Vec::with_capacity(section.components.len());
    for region in regions {
        let mut in_region: Vec<PlacedBlock<'_>> = data_blocks()
            .filter(|(_, block)| block.region == region)
            .map(|(component, block)| PlacedBlock {
                section_index,
                region: &block.region,
                weight: block.weight,
                position: BlockPosition {
                    section: section_index,
                    component,
                },
                block,
            })
            .collect();
        // Stable, so equal weights keep their stored order.
        in_region.sort_by_key(|placed| placed.weight);
        ordered.extend(in_region);
    }
    ordered
}
