use super::render::TRANSPARENT;
use super::{Ppu, SCREEN_WIDTH};

const OBJ_COUNT: usize = 128;
const OBJ_TILE_BASE: usize = 0x10000;
const OBJ_PALETTE: usize = 0x200;

/// (width, height) by shape then size.
const SIZES: [[(i32, i32); 4]; 3] = [
    [(8, 8), (16, 16), (32, 32), (64, 64)],
    [(16, 8), (32, 8), (32, 16), (64, 32)],
    [(8, 16), (8, 32), (16, 32), (32, 64)],
];

#[derive(Clone, Copy, Debug)]
pub(super) struct ObjPixel {
    pub color: u16,
    pub priority: u8,
    pub semi: bool,
}

impl Default for ObjPixel {
    fn default() -> Self {
        Self {
            color: TRANSPARENT,
            priority: 4,
            semi: false,
        }
    }
}

/// The sprite layer for one scanline plus the OBJ window coverage.
pub(super) struct ObjLine {
    pub pixels: [ObjPixel; SCREEN_WIDTH],
    pub window: [bool; SCREEN_WIDTH],
}

impl Default for ObjLine {
    fn default() -> Self {
        Self {
            pixels: [ObjPixel::default(); SCREEN_WIDTH],
            window: [false; SCREEN_WIDTH],
        }
    }
}

/// Decoded OAM attributes of one object.
struct Obj {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    affine: Option<[i32; 4]>,
    double: bool,
    hflip: bool,
    vflip: bool,
    mode: u16,
    mosaic: bool,
    bpp8: bool,
    tile: usize,
    priority: u8,
    palette: usize,
}

impl Ppu {
    #[inline]
    fn oam16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.oam[offset], self.oam[offset + 1]])
    }

    fn decode_obj(&self, index: usize) -> Option<Obj> {
        let base = index * 8;
        let a0 = self.oam16(base);
        let a1 = self.oam16(base + 2);
        let a2 = self.oam16(base + 4);

        let rot_scale = a0 & 0x100 != 0;
        if !rot_scale && a0 & 0x200 != 0 {
            return None;
        }
        let shape = (a0 >> 14) as usize;
        let mode = (a0 >> 10) & 3;
        if shape == 3 || mode == 3 {
            return None;
        }
        let (width, height) = SIZES[shape][(a1 >> 14) as usize];

        let affine = rot_scale.then(|| {
            let group = ((a1 >> 9) & 0x1F) as usize * 32;
            [6, 14, 22, 30].map(|o| self.oam16(group + o) as i16 as i32)
        });
        let x = (a1 & 0x1FF) as i32;
        Some(Obj {
            x: if x >= SCREEN_WIDTH as i32 { x - 512 } else { x },
            y: (a0 & 0xFF) as i32,
            width,
            height,
            affine,
            double: rot_scale && a0 & 0x200 != 0,
            hflip: !rot_scale && a1 & 0x1000 != 0,
            vflip: !rot_scale && a1 & 0x2000 != 0,
            mode,
            mosaic: a0 & 0x1000 != 0,
            bpp8: a0 & 0x2000 != 0,
            tile: (a2 & 0x3FF) as usize,
            priority: ((a2 >> 10) & 3) as u8,
            palette: (a2 >> 12) as usize,
        })
    }

    /// Palette index of texel (tx, ty) of `obj`, 0 when transparent.
    fn obj_texel(&self, obj: &Obj, tx: i32, ty: i32) -> usize {
        let one_dimensional = self.dispcnt & 0x40 != 0;
        let step = if obj.bpp8 { 2 } else { 1 };
        let (tile_x, tile_y) = ((tx / 8) as usize, (ty / 8) as usize);
        let row_stride = if one_dimensional {
            (obj.width / 8) as usize * step
        } else {
            32
        };
        let tile = (obj.tile + tile_y * row_stride + tile_x * step) & 0x3FF;
        let addr = OBJ_TILE_BASE + tile * 32;
        let (px, py) = ((tx & 7) as usize, (ty & 7) as usize);
        if obj.bpp8 {
            self.vram8(addr + py * 8 + px) as usize
        } else {
            let nibble = (self.vram8(addr + py * 4 + px / 2) >> ((px & 1) * 4)) & 0xF;
            if nibble == 0 {
                0
            } else {
                obj.palette * 16 + nibble as usize
            }
        }
    }

    pub(super) fn sprite_line(&self, line: usize) -> ObjLine {
        let mut out = ObjLine::default();
        let (mh, mv) = self.obj_mosaic();

        for index in 0..OBJ_COUNT {
            let Some(obj) = self.decode_obj(index) else {
                continue;
            };
            if self.bitmap_mode() && obj.tile < 512 {
                continue;
            }
            let (bw, bh) = if obj.double {
                (obj.width * 2, obj.height * 2)
            } else {
                (obj.width, obj.height)
            };
            let dy = (line as i32 - obj.y) & 0xFF;
            if dy >= bh {
                continue;
            }
            let dy = if obj.mosaic {
                let snapped = ((line - line % mv) as i32 - obj.y) & 0xFF;
                if snapped < bh { snapped } else { dy }
            } else {
                dy
            };

            for sx in 0..bw {
                let screen_x = obj.x + sx;
                if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                    continue;
                }
                let sx = if obj.mosaic {
                    (sx - screen_x % mh as i32).max(0)
                } else {
                    sx
                };

                let (tx, ty) = match obj.affine {
                    Some([pa, pb, pc, pd]) => {
                        let ix = sx - bw / 2;
                        let iy = dy - bh / 2;
                        let tx = ((pa * ix + pb * iy) >> 8) + obj.width / 2;
                        let ty = ((pc * ix + pd * iy) >> 8) + obj.height / 2;
                        if !(0..obj.width).contains(&tx) || !(0..obj.height).contains(&ty) {
                            continue;
                        }
                        (tx, ty)
                    }
                    None => (
                        if obj.hflip { obj.width - 1 - sx } else { sx },
                        if obj.vflip { obj.height - 1 - dy } else { dy },
                    ),
                };

                let color_index = self.obj_texel(&obj, tx, ty);
                if color_index == 0 {
                    continue;
                }
                let x = screen_x as usize;
                if obj.mode == 2 {
                    out.window[x] = true;
                    continue;
                }
                let pixel = &mut out.pixels[x];
                if pixel.color != TRANSPARENT && pixel.priority <= obj.priority {
                    continue;
                }
                *pixel = ObjPixel {
                    color: self.palette16(OBJ_PALETTE + color_index * 2),
                    priority: obj.priority,
                    semi: obj.mode == 1,
                };
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_obj(ppu: &mut Ppu, index: usize, attrs: [u16; 3]) {
        for (i, a) in attrs.iter().enumerate() {
            let at = index * 8 + i * 2;
            ppu.oam[at..at + 2].copy_from_slice(&a.to_le_bytes());
        }
    }

    fn solid_tile(ppu: &mut Ppu, tile: usize, nibble: u8) {
        let at = OBJ_TILE_BASE + tile * 32;
        ppu.vram[at..at + 32].fill(nibble | nibble << 4);
    }

    fn hidden(ppu: &mut Ppu) {
        for i in 0..OBJ_COUNT {
            write_obj(ppu, i, [0x0200, 0, 0]);
        }
    }

    #[test]
    fn regular_sprite_covers_its_box() {
        let mut ppu = Ppu::new();
        hidden(&mut ppu);
        solid_tile(&mut ppu, 1, 3);
        ppu.palette[OBJ_PALETTE + 6..OBJ_PALETTE + 8].copy_from_slice(&0x1234u16.to_le_bytes());
        write_obj(&mut ppu, 0, [10, 20, 1 | 2 << 10]);

        let line = ppu.sprite_line(12);
        assert_eq!(line.pixels[20].color, 0x1234);
        assert_eq!(line.pixels[20].priority, 2);
        assert_eq!(line.pixels[27].color, 0x1234);
        assert_eq!(line.pixels[28].color, TRANSPARENT);
        assert_eq!(ppu.sprite_line(18).pixels[20].color, TRANSPARENT);
    }

    #[test]
    fn lower_index_wins_at_equal_priority() {
        let mut ppu = Ppu::new();
        hidden(&mut ppu);
        solid_tile(&mut ppu, 1, 1);
        solid_tile(&mut ppu, 2, 2);
        ppu.palette[OBJ_PALETTE + 2..OBJ_PALETTE + 4].copy_from_slice(&0x0001u16.to_le_bytes());
        ppu.palette[OBJ_PALETTE + 4..OBJ_PALETTE + 6].copy_from_slice(&0x0002u16.to_le_bytes());
        write_obj(&mut ppu, 0, [0, 0, 1]);
        write_obj(&mut ppu, 1, [0, 4, 2]);
        let line = ppu.sprite_line(0);
        assert_eq!(line.pixels[4].color, 0x0001);
        assert_eq!(line.pixels[9].color, 0x0002);
    }

    #[test]
    fn obj_window_sprites_do_not_draw() {
        let mut ppu = Ppu::new();
        hidden(&mut ppu);
        solid_tile(&mut ppu, 1, 1);
        write_obj(&mut ppu, 0, [2 << 10, 0, 1]);
        let line = ppu.sprite_line(0);
        assert!(line.window[0]);
        assert_eq!(line.pixels[0].color, TRANSPARENT);
    }

    #[test]
    fn identity_affine_matches_regular() {
        let mut ppu = Ppu::new();
        hidden(&mut ppu);
        solid_tile(&mut ppu, 1, 1);
        // Parameter group 0 lives in the spare halfwords of entries 0-3.
        write_obj(&mut ppu, 1, [0x0100, 0, 1]);
        ppu.oam[6..8].copy_from_slice(&0x0100u16.to_le_bytes());
        ppu.oam[30..32].copy_from_slice(&0x0100u16.to_le_bytes());
        let line = ppu.sprite_line(3);
        assert_ne!(line.pixels[0].color, TRANSPARENT);
        assert_ne!(line.pixels[7].color, TRANSPARENT);
        assert_eq!(line.pixels[8].color, TRANSPARENT);
    }
}
