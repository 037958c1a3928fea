//! Shader handle to texture binding table
//!
//! Compiled shader programs come from outside the pipeline; all the back end
//! needs from a shader is which textures go to which sampler locations.
//! Handle 0 is the default shader and binds nothing.

use crate::render::commands::ShaderHandle;
use crate::render::resources::texture_manager::TextureKey;

/// Name of the default shader
pub const DEFAULT_SHADER_NAME: &str = "<default>";

/// One sampler binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStage {
    /// Sampler uniform location, -1 when the program does not use it
    pub location: i32,
    /// Texture to bind
    pub texture: TextureKey,
}

/// A registered shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    name: String,
    stages: Vec<ShaderStage>,
}

impl Shader {
    /// Shader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sampler bindings
    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }
}

/// All shaders known to the renderer
#[derive(Debug, Clone)]
pub struct ShaderTable {
    shaders: Vec<Shader>,
}

impl ShaderTable {
    /// Table holding only the default shader
    pub fn new() -> Self {
        Self {
            shaders: vec![Shader {
                name: DEFAULT_SHADER_NAME.to_string(),
                stages: Vec::new(),
            }],
        }
    }

    /// Register a shader, or replace the bindings of one with the same name
    pub fn register(&mut self, name: &str, stages: Vec<ShaderStage>) -> ShaderHandle {
        if let Some(handle) = self.find(name) {
            if handle != ShaderHandle::DEFAULT {
                self.shaders[handle.0 as usize].stages = stages;
            }
            return handle;
        }
        let handle = ShaderHandle(u32::try_from(self.shaders.len()).unwrap_or(0));
        if handle == ShaderHandle::DEFAULT {
            log::warn!("Shader table full, '{name}' uses the default shader");
            return handle;
        }
        self.shaders.push(Shader {
            name: name.to_string(),
            stages,
        });
        log::debug!("Registered shader '{name}' as {}", handle.0);
        handle
    }

    /// Find a shader by name
    pub fn find(&self, name: &str) -> Option<ShaderHandle> {
        self.shaders
            .iter()
            .position(|shader| shader.name == name)
            .and_then(|index| u32::try_from(index).ok())
            .map(ShaderHandle)
    }

    /// Look up a shader
    pub fn get(&self, handle: ShaderHandle) -> Option<&Shader> {
        self.shaders.get(handle.0 as usize)
    }

    /// Sampler bindings of a shader; unknown handles bind nothing
    pub fn stages(&self, handle: ShaderHandle) -> &[ShaderStage] {
        self.get(handle).map(Shader::stages).unwrap_or(&[])
    }

    /// Number of shaders including the default one
    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    /// Always false, the default shader is permanent
    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    /// Drop bindings to a texture that is going away
    pub fn forget_texture(&mut self, texture: TextureKey) {
        for shader in &mut self.shaders {
            shader.stages.retain(|stage| stage.texture != texture);
        }
    }

    /// Forget every shader but the default one
    pub fn clear(&mut self) {
        self.shaders.truncate(1);
    }
}

impl Default for ShaderTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::SlotMap;

    #[test]
    fn test_register_and_replace() {
        let mut keys: SlotMap<TextureKey, ()> = SlotMap::with_key();
        let (a, b) = (keys.insert(()), keys.insert(()));
        let mut table = ShaderTable::new();

        let handle = table.register("gfx/2d/bigchars", vec![ShaderStage { location: 0, texture: a }]);
        assert_eq!(handle, ShaderHandle(1));
        assert_eq!(table.stages(handle)[0].texture, a);

        let again = table.register("gfx/2d/bigchars", vec![ShaderStage { location: 0, texture: b }]);
        assert_eq!(again, handle);
        assert_eq!(table.len(), 2);
        assert_eq!(table.stages(handle)[0].texture, b);

        table.forget_texture(b);
        assert!(table.stages(handle).is_empty());
        assert!(table.stages(ShaderHandle(99)).is_empty());
    }

    #[test]
    fn test_default_shader_is_permanent() {
        let mut table = ShaderTable::new();
        table.register("white", Vec::new());
        table.clear();
        assert_eq!(table.len(), 1);
        assert_eq!(table.find(DEFAULT_SHADER_NAME), Some(ShaderHandle::DEFAULT));
        assert_eq!(table.get(ShaderHandle::DEFAULT).unwrap().name(), DEFAULT_SHADER_NAME);
    }
}
